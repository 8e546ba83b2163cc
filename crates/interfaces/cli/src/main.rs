mod fn_cmds;
mod output;

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use flint_config::AppConfig;
use flint_exec::{CapabilityContext, Evaluator, ExecutionRequest};
use flint_functions::{FunctionRegistry, RedbFunctionStore};
use flint_notes::DirNoteStore;
use flint_security::SecurityGate;

#[derive(Debug, Parser)]
#[command(
    name = "flint",
    version,
    about = "Run typed note scripts and manage custom functions"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a program file (`-` reads standard input).
    Eval {
        file: String,
        /// Do not expose `customFunctions`.
        #[arg(long)]
        no_functions: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Label for log lines.
        #[arg(long)]
        session: Option<String>,
        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Compile and scan a program without running it.
    Check {
        file: String,
        #[arg(long)]
        no_functions: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the declarations programs are checked against.
    Declarations,
    /// Manage custom functions.
    Fn {
        #[command(subcommand)]
        command: FnCommands,
    },
}

#[derive(Debug, Subcommand)]
enum FnCommands {
    List {
        #[arg(long)]
        json: bool,
    },
    Show {
        name: String,
    },
    /// Register a new function from a source file (`-` reads standard input).
    Register {
        name: String,
        file: String,
        #[arg(long)]
        description: Option<String>,
        /// JSON file with `{ "params": [...], "returnType": "..." }`.
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Store the function without exposing it.
        #[arg(long)]
        disabled: bool,
    },
    /// Replace the source of an existing function.
    Update {
        name: String,
        file: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    Remove {
        name: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
    /// Call a function with sample arguments.  Each argument is parsed as
    /// JSON, or taken as a string when it is not valid JSON.
    Test {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    debug!(config = %cli.config.display(), vault = %config.vault.name, "configuration loaded");

    let evaluator = open_evaluator(&config)?;
    match cli.command {
        Commands::Eval {
            file,
            no_functions,
            timeout_ms,
            session,
            json,
        } => {
            let program = read_source(&file)?;
            let mut context = CapabilityContext::new(config.vault.name.clone());
            if let Some(session) = session {
                context = context.with_session(session);
            }
            let mut request = ExecutionRequest::new(program).with_context(context);
            request.include_custom_functions = !no_functions;
            request.timeout_ms = timeout_ms;
            let result = evaluator.execute(request).await;
            output::print_result(&result, json)?;
            if !result.is_success() {
                bail!("evaluation finished with status {}", result.status);
            }
        }
        Commands::Check {
            file,
            no_functions,
            json,
        } => {
            let program = read_source(&file)?;
            let result = evaluator.check(&program, !no_functions);
            output::print_result(&result, json)?;
            if !result.is_success() {
                bail!("check finished with status {}", result.status);
            }
            if !json {
                println!("ok");
            }
        }
        Commands::Declarations => print!("{}", evaluator.declarations()),
        Commands::Fn { command } => fn_cmds::run(&evaluator, command).await?,
    }
    Ok(())
}

/// Registry, note store and gate for the configured vault.
fn open_evaluator(config: &AppConfig) -> Result<Evaluator> {
    let gate = SecurityGate::from_config(&config.security).context("loading security rules")?;
    let db_path = config.registry_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let store = RedbFunctionStore::open(&db_path)?;
    let registry = FunctionRegistry::open(config.vault.name.clone(), Arc::new(store), Arc::new(gate))
        .context("opening function registry")?;
    let notes = DirNoteStore::new(&config.vault.notes_path);
    Ok(Evaluator::new(
        config.exec.clone(),
        Arc::new(registry),
        Arc::new(notes),
    ))
}

pub(crate) fn read_source(file: &str) -> Result<String> {
    if file == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("reading program from stdin")?;
        return Ok(text);
    }
    fs::read_to_string(file).with_context(|| format!("reading {file}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_function_commands() {
        let cli = Cli::parse_from(["flint", "fn", "test", "greet", "\"Ada\"", "3"]);
        let Commands::Fn {
            command: FnCommands::Test { name, args, json },
        } = cli.command
        else {
            panic!("expected fn test");
        };
        assert_eq!(name, "greet");
        assert_eq!(args, vec!["\"Ada\"".to_string(), "3".to_string()]);
        assert!(!json);
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn opens_an_engine_under_the_data_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.vault.data_dir = dir.path().join("state").display().to_string();
        config.vault.notes_path = dir.path().join("notes").display().to_string();
        let evaluator = open_evaluator(&config).unwrap();
        assert!(config.registry_db_path().exists());

        let result = evaluator
            .evaluate("return \"ok\";", true, None, CapabilityContext::new("default"))
            .await;
        assert_eq!(result.value, Some(serde_json::json!("ok")));
    }
}
