// SQLite-backed store

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};

use crate::entity::Entity;
use crate::error::IngestError;
use crate::model::Value;

use super::Store;

pub struct SqliteStore {
    conn: Connection,
    /// Entity tables already created on this connection.
    ready: HashSet<&'static str>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        log::debug!("opened store {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, IngestError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            ready: HashSet::new(),
        }
    }

    pub fn count_rows(&self, table: &str) -> Result<usize, IngestError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Column names of `table` in declaration order; empty if it does not exist.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, IngestError> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Raw read access, for reporting and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn begin(&self) -> Result<(), IngestError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
        }
        Ok(())
    }

    fn ensure_entity_table<E: Entity>(&mut self) -> Result<(), IngestError> {
        if self.ready.contains(E::TABLE) {
            return Ok(());
        }
        let table = quote_ident(E::TABLE);
        let key = quote_ident(E::KEY_FIELD);
        let mut columns = vec![
            "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            format!("{key} {} NOT NULL", E::KEY_KIND.sql_type()),
        ];
        columns.extend(
            E::fields()
                .iter()
                .map(|f| format!("{} {}", quote_ident(f.name), f.kind.sql_type())),
        );
        let index = quote_ident(&format!("{}_{}_key", E::TABLE, E::KEY_FIELD));
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} ({});
             CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table}({key});",
            columns.join(", ")
        ))?;
        self.ready.insert(E::TABLE);
        Ok(())
    }

    fn ensure_append_table(&self, table: &str, columns: &[String]) -> Result<(), IngestError> {
        let existing = self.table_columns(table)?;
        if existing.is_empty() {
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(table),
                cols.join(", ")
            ))?;
            log::info!("created table {table}");
            return Ok(());
        }
        for column in columns {
            if !existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                self.conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    quote_ident(column)
                ))?;
                log::info!("added column {column} to {table}");
            }
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn find_by_key<E: Entity>(&mut self, key: &Value) -> Result<Option<E>, IngestError> {
        self.ensure_entity_table::<E>()?;
        self.begin()?;

        let fields = E::fields();
        let select: Vec<String> = fields.iter().map(|f| quote_ident(f.name)).collect();
        let sql = format!(
            "SELECT id, {} FROM {} WHERE {} = ?1 LIMIT 1",
            select.join(", "),
            quote_ident(E::TABLE),
            quote_ident(E::KEY_FIELD)
        );
        let found = self
            .conn
            .query_row(&sql, [key], |row| {
                let id: i64 = row.get(0)?;
                let mut values = Vec::with_capacity(fields.len());
                for idx in 0..fields.len() {
                    values.push(from_sql(row.get_ref(idx + 1)?));
                }
                Ok((id, values))
            })
            .optional()?;

        let Some((id, values)) = found else {
            return Ok(None);
        };
        let key_text = key
            .key_string()
            .ok_or_else(|| IngestError::Persistence(format!("{}: empty key", E::NAME)))?;
        let mut entity = E::from_key(&key_text).map_err(|message| IngestError::InvalidField {
            entity: E::NAME.to_string(),
            field: E::KEY_FIELD.to_string(),
            message,
        })?;
        entity.set_id(id);
        for (field, value) in fields.iter().zip(&values) {
            (field.apply)(&mut entity, value).map_err(|message| {
                IngestError::Persistence(format!(
                    "{}.{} holds an unreadable value: {message}",
                    E::TABLE,
                    field.name
                ))
            })?;
        }
        Ok(Some(entity))
    }

    fn create<E: Entity>(&mut self, mut entity: E) -> Result<E, IngestError> {
        self.ensure_entity_table::<E>()?;
        self.begin()?;

        let fields = E::fields();
        let mut names = vec![quote_ident(E::KEY_FIELD)];
        names.extend(fields.iter().map(|f| quote_ident(f.name)));
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(E::TABLE),
            names.join(", "),
            placeholders.join(", ")
        );

        let mut values = vec![entity.key()];
        values.extend(fields.iter().map(|f| (f.read)(&entity)));
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        entity.set_id(self.conn.last_insert_rowid());
        Ok(entity)
    }

    fn update<E: Entity>(&mut self, entity: &E) -> Result<(), IngestError> {
        let id = entity.id().ok_or_else(|| {
            IngestError::Persistence(format!("{}: cannot update an unsaved row", E::NAME))
        })?;
        self.ensure_entity_table::<E>()?;
        self.begin()?;

        let fields = E::fields();
        let assignments: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{} = ?{}", quote_ident(f.name), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            quote_ident(E::TABLE),
            assignments.join(", "),
            fields.len() + 1
        );

        let mut values: Vec<Value> = fields.iter().map(|f| (f.read)(entity)).collect();
        values.push(Value::Int(id));
        let changed = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        if changed == 0 {
            return Err(IngestError::Persistence(format!(
                "{} row {id} no longer exists",
                E::TABLE
            )));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IngestError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), IngestError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn append_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        chunk_size: usize,
    ) -> Result<usize, IngestError> {
        if columns.is_empty() {
            return Ok(0);
        }
        self.ensure_append_table(table, columns)?;

        let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        );

        // Inside a caller's transaction the chunks join it.
        let owns_tx = self.conn.is_autocommit();
        let mut written = 0;
        for chunk in rows.chunks(chunk_size.max(1)) {
            if owns_tx {
                self.conn.execute_batch("BEGIN TRANSACTION")?;
            }
            let result = (|| -> Result<(), rusqlite::Error> {
                let mut stmt = self.conn.prepare_cached(&sql)?;
                for row in chunk {
                    stmt.execute(params_from_iter(row.iter()))?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => {
                    if owns_tx {
                        self.conn.execute_batch("COMMIT")?;
                    }
                    written += chunk.len();
                    log::debug!("{table}: appended {written}/{} rows", rows.len());
                }
                Err(e) => {
                    if owns_tx {
                        self.conn.execute_batch("ROLLBACK")?;
                    }
                    return Err(IngestError::Persistence(format!(
                        "{table}: append failed after {written} rows: {e}"
                    )));
                }
            }
        }
        Ok(written)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(n) => ToSqlOutput::Owned(SqlValue::Integer(*n)),
            Value::Float(n) => ToSqlOutput::Owned(SqlValue::Real(*n)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(n) => Value::Float(n),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Department, Site};

    #[test]
    fn create_then_find() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut dept = Department::from_key("eng@x.com").unwrap();
        dept.name = Some("Eng".into());
        dept.size = Some(12);
        let dept = store.create(dept).unwrap();
        store.commit().unwrap();
        assert!(dept.id.is_some());

        let found: Department = store
            .find_by_key(&Value::Text("eng@x.com".into()))
            .unwrap()
            .unwrap();
        assert_eq!(found, dept);
        store.commit().unwrap();

        let missing: Option<Department> =
            store.find_by_key(&Value::Text("ops@x.com".into())).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn unique_key_index_rejects_duplicates() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create(Site::from_key("7").unwrap()).unwrap();
        store.commit().unwrap();
        let err = store.create(Site::from_key("7").unwrap()).unwrap_err();
        assert!(matches!(err, IngestError::Persistence(_)));
        store.rollback().unwrap();
        assert_eq!(store.count_rows("sites").unwrap(), 1);
    }

    #[test]
    fn rollback_discards_pending_change() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create(Department::from_key("a@x.com").unwrap()).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count_rows("departments").unwrap(), 0);
    }

    #[test]
    fn append_creates_and_widens_table() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let cols = vec!["source_id".to_string(), "clicks".to_string()];
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i), Value::Int(i * 2)]).collect();
        assert_eq!(store.append_rows("ads_click", &cols, &rows, 2).unwrap(), 5);

        let wider = vec!["source_id".to_string(), "country".to_string()];
        let more = vec![vec![Value::Int(9), Value::Text("US".into())]];
        store.append_rows("ads_click", &wider, &more, 2).unwrap();

        assert_eq!(store.count_rows("ads_click").unwrap(), 6);
        assert_eq!(
            store.table_columns("ads_click").unwrap(),
            vec!["source_id", "clicks", "country"]
        );
    }

    #[test]
    fn append_matches_existing_columns_ignoring_case() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let first = vec!["kind".to_string(), "Clicks".to_string()];
        store
            .append_rows("events", &first, &[vec![Value::Text("open".into()), Value::Int(1)]], 10)
            .unwrap();

        let second = vec!["kind".to_string(), "clicks".to_string()];
        let written = store
            .append_rows("events", &second, &[vec![Value::Text("open".into()), Value::Int(4)]], 10)
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.table_columns("events").unwrap(), vec!["kind", "Clicks"]);
        let total: i64 = store
            .connection()
            .query_row("SELECT SUM(clicks) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 5);
    }

    #[test]
    fn identifiers_are_quoted() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let cols = vec!["select".to_string(), "we\"ird".to_string()];
        let rows = vec![vec![Value::Int(1), Value::Null]];
        store.append_rows("order", &cols, &rows, 10).unwrap();
        assert_eq!(store.table_columns("order").unwrap(), vec!["select", "we\"ird"]);
    }
}
