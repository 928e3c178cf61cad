//! Database layer for persistence using Diesel ORM (§4.A Store).

pub mod model;
pub mod schema;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{Error, Result};

/// Database connection pool type alias.
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Create a connection pool for the given database URL.
///
/// Sized for §5's resource model in spirit (the source's 500+300 Postgres
/// pool has no SQLite equivalent; `max_size` is the practical bound on
/// concurrent readers/writers a single SQLite file tolerates well).
///
/// # Errors
/// Returns an error if the pool cannot be created.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Pool::builder()
        .max_size(16)
        .build(manager)
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Run embedded migrations against a pool's connection, idempotent.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().map_err(|e| Error::Connection(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
pub fn test_pool() -> DbPool {
    let pool = create_pool(":memory:").expect("create in-memory pool");
    run_migrations(&pool).expect("run migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pool_with_memory_db() {
        let pool = create_pool(":memory:");
        assert!(pool.is_ok());
    }

    #[test]
    fn migrations_run_against_memory_db() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        use diesel::prelude::*;
        let count: i64 = diesel::dsl::sql::<diesel::sql_types::BigInt>(
            "select count(*) from sqlite_master where type='table' and name='subscriptions'",
        )
        .get_result(&mut conn)
        .unwrap();
        assert_eq!(count, 1);
    }
}
