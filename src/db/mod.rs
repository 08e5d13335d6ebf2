//! Log storage.
//!
//! Probe history goes through the [`LogStore`] trait, backed either by a
//! bounded in-memory ring or by SQLite.

mod memory;
mod models;
mod sqlite;
mod store;

pub use memory::*;
pub use models::*;
pub use sqlite::*;
pub use store::*;
