//! adaptest CLI — validate item banks, simulate adaptive tests, score sessions.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

use commands::Overrides;

#[derive(Parser)]
#[command(name = "adaptest", version, about = "Computerized adaptive testing on the 3PL IRT model")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate item bank TOML files
    Validate {
        /// Path to item bank file or directory
        #[arg(long)]
        bank: PathBuf,
    },

    /// Simulate one adaptive test for a simulee of known ability
    Simulate {
        /// Path to item bank file or directory
        #[arg(long)]
        bank: PathBuf,

        /// True ability of the simulee
        #[arg(long, allow_hyphen_values = true)]
        theta: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run many simulations and report estimate recovery per ability
    Batch {
        /// Path to item bank file or directory
        #[arg(long)]
        bank: PathBuf,

        /// True abilities (comma-separated, e.g. "-2,-1,0,1,2")
        #[arg(long, allow_hyphen_values = true, default_value = "-2,-1,0,1,2")]
        thetas: String,

        /// Replications per ability
        #[arg(long, default_value = "20")]
        replications: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Write the full report as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Score a stored session
    Score {
        /// Serialized session JSON file
        #[arg(long, conflicts_with_all = ["store", "session_id"])]
        file: Option<PathBuf>,

        /// Session store directory
        #[arg(long, requires = "session_id")]
        store: Option<PathBuf>,

        /// Session id inside the store
        #[arg(long)]
        session_id: Option<String>,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example item bank
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adaptest=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { bank } => commands::validate::execute(bank),
        Commands::Simulate {
            bank,
            theta,
            seed,
            format,
            overrides,
        } => commands::simulate::execute(bank, theta, seed, format, overrides),
        Commands::Batch {
            bank,
            thetas,
            replications,
            seed,
            output,
            overrides,
        } => commands::batch::execute(bank, thetas, replications, seed, output, overrides),
        Commands::Score {
            file,
            store,
            session_id,
            format,
            config,
        } => commands::score::execute(file, store, session_id, format, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
