use diesel::connection::SimpleConnection;
use diesel::r2d2::ConnectionManager;
use diesel::sqlite::SqliteConnection;
use rocket_contrib::databases::{r2d2, DatabaseConfig, Poolable};
use rocket_contrib::databases::r2d2::ManageConnection;
use std::ops::Deref;
use std::sync::RwLock;

// SQLite only allows one writer at a time, so every write takes this lock
// exclusively and every read takes it shared.
// Never acquire it twice on the same thread: std's RwLock is not reentrant.
lazy_static! {
    pub static ref DB_LOCK: RwLock<()> = RwLock::new(());
}

#[macro_export]
macro_rules! lock_db_write {
    () => {
        crate::DB_LOCK.write()
            .map_err(|_| "Cannot lock database for writing")
    };
}

#[macro_export]
macro_rules! lock_db_read {
    () => {
        crate::DB_LOCK.read()
            .map_err(|_| "Cannot lock database for reading")
    };
}

// Item owners are enforced by foreign keys, which SQLite leaves off
// unless every connection asks for them.
const ITEM_STORE_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 10000;";

// A pooled connection that has had ITEM_STORE_PRAGMAS applied.
// Derefs to the plain SqliteConnection the stores take.
pub struct StoreConnection(SqliteConnection);

impl Deref for StoreConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        &self.0
    }
}

pub struct StoreConnectionManager(ConnectionManager<SqliteConnection>);

impl ManageConnection for StoreConnectionManager {
    type Connection = StoreConnection;
    type Error = diesel::r2d2::Error;

    fn connect(&self) -> Result<StoreConnection, Self::Error> {
        let conn = self.0.connect()?;
        conn.batch_execute(ITEM_STORE_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(StoreConnection(conn))
    }

    fn is_valid(&self, conn: &mut StoreConnection) -> Result<(), Self::Error> {
        self.0.is_valid(&mut conn.0)
    }

    fn has_broken(&self, conn: &mut StoreConnection) -> bool {
        self.0.has_broken(&mut conn.0)
    }
}

impl Poolable for StoreConnection {
    type Manager = StoreConnectionManager;
    type Error = r2d2::Error;

    fn pool(config: DatabaseConfig) -> Result<r2d2::Pool<Self::Manager>, Self::Error> {
        let manager = StoreConnectionManager(ConnectionManager::new(config.url));
        r2d2::Pool::builder().max_size(config.pool_size).build(manager)
    }
}
