//! Database layer
//!
//! Persistence for Userhub's two stores: user accounts and server-side
//! sessions. Supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The database driver is selected based on configuration. Access goes
//! through a trait-based abstraction (`DatabasePool`) so repositories work
//! with either backend without knowing the specific driver.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
