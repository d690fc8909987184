//! Append-only ingestion of raw event tables.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::IngestError;
use crate::model::{RecordSet, Value};
use crate::store::Store;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "raw_create_date";

pub struct BulkAppender<'a, S: Store> {
    store: &'a mut S,
    chunk_size: usize,
    timestamp_column: String,
}

impl<'a, S: Store> BulkAppender<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn timestamp_column(mut self, column: &str) -> Self {
        self.timestamp_column = column.to_string();
        self
    }

    /// Write every row of `records` to `table`, stamped with `ingested_at`.
    /// Returns the number of rows written.
    pub fn append(
        &mut self,
        records: &RecordSet,
        table: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<usize, IngestError> {
        if records.is_empty() {
            log::info!("{table}: nothing to append");
            return Ok(0);
        }
        let mut stamped = records.clone();
        stamped.stamp_column(
            &self.timestamp_column,
            Value::Text(ingested_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let written =
            self.store
                .append_rows(table, stamped.columns(), stamped.rows(), self.chunk_size)?;
        log::info!("{table}: appended {written} rows");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    fn clicks(n: i64) -> RecordSet {
        RecordSet::with_rows(
            vec!["source_id".into(), "clicks".into()],
            (0..n).map(|i| vec![Value::Int(i), Value::Int(1)]).collect(),
        )
    }

    #[test]
    fn appending_twice_doubles_rows() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let records = clicks(2500);

        let mut appender = BulkAppender::new(&mut store);
        assert_eq!(appender.append(&records, "ads_click", ts).unwrap(), 2500);
        assert_eq!(appender.append(&records, "ads_click", ts).unwrap(), 2500);
        assert_eq!(store.count_rows("ads_click").unwrap(), 5000);
    }

    #[test]
    fn every_row_gets_the_same_stamp() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut records = clicks(3);
        records.stamp_column("raw_create_date", Value::Text("stale".into()));

        BulkAppender::new(&mut store)
            .chunk_size(2)
            .append(&records, "ads_click", ts)
            .unwrap();

        let stamps: Vec<String> = store
            .connection()
            .prepare("SELECT DISTINCT raw_create_date FROM ads_click")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(stamps, vec!["2024-05-01T12:00:00.000000Z".to_string()]);
        assert_eq!(
            store.table_columns("ads_click").unwrap(),
            vec!["source_id", "clicks", "raw_create_date"]
        );
    }

    #[test]
    fn empty_record_set_writes_nothing() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let written = BulkAppender::new(&mut store)
            .append(&clicks(0), "ads_click", Utc::now())
            .unwrap();
        assert_eq!(written, 0);
        assert!(store.table_columns("ads_click").unwrap().is_empty());
    }
}
