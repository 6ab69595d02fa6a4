use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};
use rocket_db_pools::Database;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Primary connection pool, configured under `databases.member_db`.
#[derive(Database)]
#[database("member_db")]
pub struct MemberDb(sqlx::PgPool);

/// Apply pending migrations. Already applied migrations are skipped, and a
/// checksum mismatch aborts startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("checking database migration state");

    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}
