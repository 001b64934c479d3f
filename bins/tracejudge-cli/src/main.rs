mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tracejudge-cli")]
#[command(about = "tracejudge CLI - Run candidates in the sandbox and maintain response files", long_about = None)]
struct Cli {
    /// Sandbox configuration file (defaults are used when it does not exist)
    #[arg(long, global = true, default_value = "config/sandbox.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file against one input in the sandbox
    Run {
        /// Python source file
        #[arg(short, long)]
        source: PathBuf,

        /// File fed to stdin (empty input when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Expected output file; prints a verdict when given
        #[arg(short, long)]
        expected: Option<PathBuf>,

        /// Wall-clock limit in seconds (overrides the config)
        #[arg(long)]
        time_limit: Option<f64>,
    },

    /// Print the code block a response would yield
    Extract {
        /// File holding the raw response text
        #[arg(short, long)]
        response: PathBuf,
    },

    /// Add confusion statistics to records that lack them (rewrites the file)
    AddStats {
        /// Responses file (JSONL)
        file: PathBuf,
    },

    /// Aggregate confusion statistics for naive, reasoning and overall
    Summarize {
        /// Responses file (JSONL)
        file: PathBuf,

        /// Print JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Convert a JSONL responses file into a pretty JSON array
    Convert {
        #[arg(short, long, default_value = "data/responses.jsonl")]
        input: PathBuf,

        #[arg(short, long, default_value = "data/responses.json")]
        output: PathBuf,
    },

    /// Drop records with an empty trace
    PruneBlank {
        #[arg(short, long, default_value = "data/responses.jsonl")]
        input: PathBuf,

        /// Output file (defaults to rewriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            source,
            input,
            expected,
            time_limit,
        } => {
            commands::run(
                &cli.config,
                &source,
                input.as_deref(),
                expected.as_deref(),
                time_limit,
            )
            .await?;
        }
        Commands::Extract { response } => {
            commands::extract(&cli.config, &response)?;
        }
        Commands::AddStats { file } => {
            commands::add_stats(&file)?;
        }
        Commands::Summarize { file, json } => {
            commands::summarize(&file, json)?;
        }
        Commands::Convert { input, output } => {
            commands::convert(&input, &output)?;
        }
        Commands::PruneBlank { input, output } => {
            let output = output.unwrap_or_else(|| input.clone());
            commands::prune_blank(&input, &output)?;
        }
    }

    Ok(())
}
