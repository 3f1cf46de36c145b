use camatrix::{cmd, config, error};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "camatrix",
    about = "Analyze Conditional Access policies",
    version,
    long_about = "Conditional Access impact matrix for Microsoft Entra ID\n\n\
                  Lists which Conditional Access policies apply to which users and\n\
                  writes the result as CSV and JSON."
)]
struct Cli {
    #[command(flatten)]
    matrix: cmd::matrix::MatrixArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("camatrix=debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        let level = config::ConfigManager::new()
            .and_then(|c| c.load_settings())
            .ok()
            .and_then(|s| s.log_level)
            .unwrap_or_else(|| "warn".to_string());
        EnvFilter::try_new(format!("camatrix={}", level))
            .unwrap_or_else(|_| EnvFilter::new("camatrix=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> error::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    cmd::matrix::run(cli.matrix).await
}
