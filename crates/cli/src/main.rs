mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Schema evaluation engine.
#[derive(Parser)]
#[command(name = "formeval", version, about = "Schema evaluation engine")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Data and context arguments shared by the evaluating subcommands. Each
/// takes a JSON file path or an inline JSON object.
#[derive(clap::Args)]
pub(crate) struct Inputs {
    /// Path to the schema JSON file
    schema: PathBuf,
    /// Data object (file path or inline JSON)
    #[arg(long)]
    data: String,
    /// Context object (file path or inline JSON)
    #[arg(long)]
    context: Option<String>,
}

/// Shape of multi-path results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum PathFormat {
    Nested,
    Flat,
    Array,
}

impl From<PathFormat> for formeval_eval::ReturnFormat {
    fn from(f: PathFormat) -> Self {
        match f {
            PathFormat::Nested => formeval_eval::ReturnFormat::Nested,
            PathFormat::Flat => formeval_eval::ReturnFormat::Flat,
            PathFormat::Array => formeval_eval::ReturnFormat::Array,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a schema against data and print the evaluated schema
    Evaluate {
        #[command(flatten)]
        inputs: Inputs,
        /// Leave layouts unresolved
        #[arg(long)]
        skip_layout: bool,
        /// Leave out nodes that are not visible
        #[arg(long)]
        exclude_hidden: bool,
        /// Leave out the `$params` block
        #[arg(long)]
        without_params: bool,
        /// Print only the entries at these paths
        #[arg(long = "path")]
        paths: Vec<String>,
        /// Shape of the `--path` results
        #[arg(long, default_value = "nested", value_enum)]
        format: PathFormat,
    },

    /// Run a JSON-logic expression against data, without a schema
    Logic {
        /// Expression (file path or inline JSON)
        logic: String,
        /// Data object (file path or inline JSON)
        #[arg(long)]
        data: Option<String>,
        /// Context object (file path or inline JSON)
        #[arg(long)]
        context: Option<String>,
    },

    /// Validate data against the schema's rules
    Validate {
        #[command(flatten)]
        inputs: Inputs,
        /// Only check nodes under these paths
        #[arg(long = "path")]
        paths: Vec<String>,
    },

    /// Recompute what depends on the changed paths
    Dependents {
        #[command(flatten)]
        inputs: Inputs,
        /// Changed data paths
        #[arg(long, required = true, num_args = 1..)]
        changed: Vec<String>,
        /// Also recompute schema descendants of changed nodes
        #[arg(long)]
        nested: bool,
    },

    /// List the subform paths of a schema
    Subforms {
        /// Path to the schema JSON file
        schema: PathBuf,
    },

    /// Print the evaluated value at a path, or every value
    Value {
        #[command(flatten)]
        inputs: Inputs,
        /// Node or property path
        #[arg(long)]
        path: Option<String>,
        /// Print `{"a.b": v}` instead of nested values
        #[arg(long)]
        flat: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => match commands::load_config(path) {
            Ok(c) => c,
            Err(msg) => {
                report_error(&msg, cli.output, cli.quiet);
                process::exit(1);
            }
        },
        None => formeval_eval::EngineConfig::default(),
    };
    let ctx = commands::Ctx {
        output: cli.output,
        quiet: cli.quiet,
        config,
    };

    let code = match cli.command {
        Commands::Evaluate {
            inputs,
            skip_layout,
            exclude_hidden,
            without_params,
            paths,
            format,
        } => commands::evaluate::cmd_evaluate(
            &ctx,
            &inputs,
            &commands::evaluate::Projection {
                skip_layout,
                exclude_hidden,
                without_params,
                paths,
                format: format.into(),
            },
        ),
        Commands::Logic {
            logic,
            data,
            context,
        } => commands::logic::cmd_logic(&ctx, &logic, data.as_deref(), context.as_deref()),
        Commands::Validate { inputs, paths } => {
            commands::validate::cmd_validate(&ctx, &inputs, &paths)
        }
        Commands::Dependents {
            inputs,
            changed,
            nested,
        } => commands::dependents::cmd_dependents(&ctx, &inputs, &changed, nested),
        Commands::Subforms { schema } => commands::subforms::cmd_subforms(&ctx, &schema),
        Commands::Value { inputs, path, flat } => {
            commands::value::cmd_value(&ctx, &inputs, path.as_deref(), flat)
        }
    };
    process::exit(code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
