use anyhow::{Context, Result};
use clap::Parser;
use kraken_grid::settings::DEFAULT_CONFIG_NAME;
use kraken_grid::{Credentials, FailurePolicy, GridExecutor, KrakenClient, Settings};
use tracing_subscriber::EnvFilter;

/// Place a buy/sell pair of limit orders on Kraken for every configured position
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML); the extension may be omitted
    #[arg(long, default_value = DEFAULT_CONFIG_NAME)]
    config: String,

    /// Have Kraken validate the orders without placing them
    #[arg(long)]
    validate_only: bool,

    /// Override the configured failure policy
    #[arg(long, value_enum)]
    failure_policy: Option<FailurePolicy>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("❌ {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("Error reading config file {}", args.config))?;
    if let Some(policy) = args.failure_policy {
        settings.execution.failure_policy = policy;
    }
    settings.execution.validate_only |= args.validate_only;

    let credentials = Credentials::from_env().context("Missing Kraken API credentials")?;

    tracing::info!("🚀 kraken-grid starting");
    tracing::info!("  Endpoint: {}", credentials.rest_url);
    tracing::info!("  Positions: {}", settings.positions.len());
    tracing::info!("  Failure policy: {:?}", settings.execution.failure_policy);
    if settings.execution.validate_only {
        tracing::info!("  Validate only: orders will not be placed");
    }

    let client = KrakenClient::new(credentials, &settings.api)
        .context("Failed to build Kraken client")?
        .with_validate_only(settings.execution.validate_only);

    let executor = GridExecutor::new(&client, settings.execution.failure_policy);
    let report = executor.run(&settings.positions).await?;

    tracing::info!(
        positions_priced = report.positions_priced,
        positions_skipped = report.positions_skipped,
        orders_placed = report.orders_placed,
        orders_failed = report.orders_failed,
        "👋 Run complete"
    );

    Ok(())
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kraken_grid=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
