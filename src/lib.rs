//! Statement resolution and lifecycle engine for synchronous SQL drivers.
//!
//! A template with `:name` and `?` markers is rewritten once into native placeholder syntax.
//! Bound values are turned into encoders by an ordered argument registry, result rows are
//! decoded by a mapping registry, and everything a statement acquires is released in reverse
//! order by its cleanup chain, whether the statement succeeds or not.
//!
//! ```rust
//! use sql_pipeline::prelude::*;
//! use sql_pipeline::sqlite::SqliteSession;
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let handle = engine.open(SqliteSession::open_in_memory()?);
//! handle.query("create table users (id integer, name text)").dml()?;
//! handle
//!     .query("insert into users values (:id, :name)")
//!     .bind("id", 1_i64)
//!     .bind("name", "ana".to_string())
//!     .dml()?;
//!
//! let mut rows = handle.query("select id, name from users").select()?;
//! let row = rows.next_row()?;
//! assert_eq!(row.get("name"), Some(&RowValues::Text("ana".into())));
//! assert!(rows.is_closed());
//! # Ok::<(), SqlPipelineError>(())
//! ```

pub mod argument;
pub mod binding;
pub mod cleanup;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod engine;
pub mod error;
pub mod handle;
pub mod locator;
pub mod mapper;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod translation;
pub mod typed;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::Engine;
pub use error::SqlPipelineError;
pub use handle::Handle;
pub use statement::{Batch, Statement};
