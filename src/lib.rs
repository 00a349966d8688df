//! Active-record data layer over SQLite.
//!
//! # Intention
//!
//! - Give each table a record type with a dynamic attribute bag, a fluent
//!   finder (`find`/`order`/`limit`/`offset`/`fetch`) and `save`/`destroy`.
//! - Keep SQL text in the caller's hands; values always travel as named
//!   parameters, identifiers and clauses are interpolated as given.
//!
//! # Architectural Boundaries
//!
//! - No relationships, migrations or transactions beyond single statements.
//! - Raw statement execution lives behind [`Executor`] and [`Crud`]; records
//!   only orchestrate.
//!
//! ```
//! use rust_datalayer::{Entity, EntityConfig, Record, SqliteStore};
//! use std::sync::Arc;
//!
//! struct User;
//!
//! impl Entity for User {
//!     fn config() -> EntityConfig {
//!         EntityConfig::new().required(["name"])
//!     }
//! }
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! store
//!     .execute_batch("CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT)")
//!     .unwrap();
//!
//! let mut user = Record::<User>::with_store(store.clone(), store.clone());
//! user.set("name", "Ann");
//! assert!(user.save());
//! assert_eq!(user.get("id").as_i64(), Some(1));
//! ```

pub mod connect;
pub mod entity;
pub mod error;
pub mod record;
pub mod sqlite;
pub mod value;

pub use connect::{Connect, SqliteConfig};
pub use entity::{Entity, EntityConfig, Schema};
pub use error::{DataLayerError, Result};
pub use record::Record;
pub use sqlite::{Crud, CrudOperation, Executor, SqlQuery, SqliteStore};
pub use value::{Attributes, Params, Value};
