use log::*;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};

use crate::SqliteDatabase;

/// Builds a fresh exchange database at `url` and initialises logging. Any leftover file from an earlier aborted run
/// is dropped first, then the engine migrations are applied, so every test starts from an empty, current schema.
pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    if let Err(e) = Sqlite::drop_database(url).await {
        trace!("No previous database to drop at {url}: {e}");
    }
    Sqlite::create_database(url).await.expect("could not create the test database");
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("could not connect to the test database");
    migrate!("./src/sqlite/migrations").run(db.pool()).await.expect("migrations failed");
    info!("🚀️ Test database ready at {url}");
}

/// A database URL unique to this test run.
pub fn random_db_path() -> String {
    format!("sqlite://../data/test_exchange_{}", rand::random::<u64>())
}
