//! quire CLI - worksheet evaluation from the terminal.

mod colors;
mod eval;
mod list;
mod output;
mod repl;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use quire_core::{EngineConfig, NotebookDirs, Scheduler, SchedulerConfig};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Evaluate worksheet cells on long-running interpreters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Notebook directory (defaults to the user data directory)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Engine for code cells, overriding the configuration file
    #[arg(long, global = true, value_enum)]
    engine: Option<EngineKind>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineKind {
    /// Python 3 interactive interpreter
    Python,
    /// POSIX shell
    Shell,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session on a document
    Repl {
        /// Document name
        #[arg(short, long)]
        document: Option<String>,
    },

    /// Evaluate a file of cells separated by blank lines
    Eval {
        /// Path to the source file
        file: PathBuf,

        /// Document name (defaults to the file stem)
        #[arg(short, long)]
        document: Option<String>,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// List the documents of the notebook directory
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let scheduler = open(&cli)?;

    match cli.command {
        Commands::Repl { document } => {
            repl::execute(scheduler, document.as_deref()).await?;
        }

        Commands::Eval {
            file,
            document,
            timeout,
        } => {
            eval::execute(scheduler, &file, document.as_deref(), timeout)?;
        }

        Commands::List => list::execute(scheduler)?,
    }

    Ok(())
}

/// Build the scheduler from the global options.
fn open(cli: &Cli) -> anyhow::Result<Scheduler> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    match cli.engine {
        Some(EngineKind::Python) => config.engine = EngineConfig::default(),
        Some(EngineKind::Shell) => config.engine = EngineConfig::shell(),
        None => {}
    }

    let root = cli.dir.clone().unwrap_or_else(NotebookDirs::default_root);
    let dirs = NotebookDirs::new(&root)?;
    dirs.clean_scratch()?;
    tracing::debug!("Notebook directory: {}", root.display());

    Ok(Scheduler::new(config, dirs)?)
}
