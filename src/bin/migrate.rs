use anyhow::Result;
use nft_indexer::logging::init_tracing;
use nft_indexer::repository::Database;
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    dotenv::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./indexer.db".to_string());

    info!("Running migrations on database: {database_url}");

    let _db = Database::new(&database_url)?;

    info!("Migrations completed successfully");

    Ok(())
}
