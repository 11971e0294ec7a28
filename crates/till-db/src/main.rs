//! till-migrate: applies pending schema migrations to `DATABASE_URL`.

use till_db::MigrationRunner;
use tokio_postgres::NoTls;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/till".to_string());
    let (mut client, connection) = tokio_postgres::connect(&database_url, NoTls).await?;

    // Spawn the connection task
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Database connection error: {}", e);
        }
    });

    let mut runner = MigrationRunner::new(&mut client);
    let ran = runner.migrate().await?;
    if ran.is_empty() {
        tracing::info!("database is up to date");
    } else {
        tracing::info!(count = ran.len(), "migrations applied");
    }

    Ok(())
}
