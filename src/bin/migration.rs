use anyhow::Context;
use tracing::info;

use marketplace_orders::{config, migrator};

/// Applies the schema (`migration` or `migration up`) or rolls it back (`migration down`).
/// The database URL comes from `DATABASE_URL` when set, otherwise from the app config.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            config::load_config()
                .context("failed to load configuration")?
                .database_url
        }
    };

    let direction = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    info!(direction = %direction, "Starting database migration");

    match direction.as_str() {
        "up" => migrator::run_migration(&database_url).await?,
        "down" => migrator::rollback_migration(&database_url).await?,
        other => anyhow::bail!("unknown migration direction '{other}', expected 'up' or 'down'"),
    }

    info!("Migration completed successfully");
    Ok(())
}
