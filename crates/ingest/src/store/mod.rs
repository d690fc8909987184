//! Persistence boundary.
//!
//! The pipeline only ever talks to a [`Store`]. Entity reads and writes open a
//! transaction implicitly; [`Store::commit`] / [`Store::rollback`] close it.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::entity::Entity;
use crate::error::IngestError;
use crate::model::Value;

pub trait Store {
    fn find_by_key<E: Entity>(&mut self, key: &Value) -> Result<Option<E>, IngestError>;

    /// Insert a new row; returns the entity with its surrogate id set.
    fn create<E: Entity>(&mut self, entity: E) -> Result<E, IngestError>;

    /// Overwrite every mutable attribute of an already persisted row.
    fn update<E: Entity>(&mut self, entity: &E) -> Result<(), IngestError>;

    fn commit(&mut self) -> Result<(), IngestError>;

    fn rollback(&mut self) -> Result<(), IngestError>;

    /// Insert `rows` into `table`, one transaction per `chunk_size` rows.
    /// Never deduplicates. Returns the number of rows written.
    fn append_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        chunk_size: usize,
    ) -> Result<usize, IngestError>;
}
