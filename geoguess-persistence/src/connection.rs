use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://geoguess.db?mode=rwc";

pub async fn connect_to_database(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Single-connection in-memory database; every pooled connection would
/// otherwise see its own empty database.
pub async fn connect_to_memory_database() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    Database::connect(options).await
}

pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = connect_to_database(database_url).await?;
    Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied");
    Ok(db)
}
