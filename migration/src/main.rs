use sea_orm_migration::prelude::*;

// Reads DATABASE_URL; `migration up | down | fresh | status`
#[tokio::main]
async fn main() {
    cli::run_cli(migration::Migrator).await;
}
