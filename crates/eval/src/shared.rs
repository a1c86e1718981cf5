//! One instance, many threads.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::instance::SchemaEvaluator;

/// Clonable handle that serialises every call into one instance: an
/// evaluation holds the lock until it returns, so calls queue instead of
/// interleaving.
#[derive(Debug, Clone)]
pub struct SharedEvaluator {
    inner: Arc<Mutex<SchemaEvaluator>>,
}

impl SharedEvaluator {
    pub fn new(evaluator: SchemaEvaluator) -> Self {
        SharedEvaluator {
            inner: Arc::new(Mutex::new(evaluator)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchemaEvaluator> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the instance.
    pub fn with<R>(&self, f: impl FnOnce(&mut SchemaEvaluator) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

impl From<SchemaEvaluator> for SharedEvaluator {
    fn from(evaluator: SchemaEvaluator) -> Self {
        SharedEvaluator::new(evaluator)
    }
}
