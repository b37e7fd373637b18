use std::sync::Arc;

use ingesta::configuration::get_settings;
use ingesta::db::connection::initialize_pool;
use ingesta::db::migrations::run_pending_on_pool;
use ingesta::{Result, startup, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;
    info!("Starting import service...");

    let settings = get_settings()?;
    let pool = initialize_pool(&settings.database);
    run_pending_on_pool(&pool)?;

    startup::launch(settings, Arc::new(pool)).await
}
