use std::collections::HashMap;

use crate::error::IngestError;

// ---------------------------------------------------------------------------
// Scalar values
// ---------------------------------------------------------------------------

/// A single cell value as decoded from a tabular file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Type a raw text cell the way delimited files are read: empty is null,
    /// integers and decimals become numbers, everything else stays text.
    /// Numerics with a leading zero (postal codes, phone extensions) stay text.
    pub fn infer(raw: &str) -> Self {
        if raw.is_empty() {
            return Value::Null;
        }
        let digits = raw.strip_prefix('-').unwrap_or(raw);
        let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
        if !leading_zero {
            if let Ok(n) = raw.parse::<i64>() {
                return Value::Int(n);
            }
            if digits.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                if let Ok(n) = raw.parse::<f64>() {
                    if n.is_finite() {
                        return Value::Float(n);
                    }
                }
            }
        }
        Value::Text(raw.to_string())
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            nested => Value::Text(nested.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text rendering; integral floats drop their decimals.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(n) => Some(format_float(*n)),
            Value::Text(s) => Some(s.clone()),
        }
    }

    pub fn as_i64(&self) -> Result<Option<i64>, String> {
        match self {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(i64::from(*b))),
            Value::Int(n) => Ok(Some(*n)),
            Value::Float(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(Some(*n as i64)),
            Value::Float(n) => Err(format!("expected an integer, got {n}")),
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                if let Ok(n) = trimmed.parse::<i64>() {
                    return Ok(Some(n));
                }
                match trimmed.parse::<f64>() {
                    Ok(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(Some(n as i64)),
                    _ => Err(format!("expected an integer, got {s:?}")),
                }
            }
        }
    }

    pub fn as_bool(&self) -> Result<Option<bool>, String> {
        match self {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Int(n) => Ok(Some(*n != 0)),
            Value::Float(n) => Ok(Some(*n != 0.0)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(None),
                "true" | "t" | "yes" | "y" | "1" => Ok(Some(true)),
                "false" | "f" | "no" | "n" | "0" => Ok(Some(false)),
                _ => Err(format!("expected a boolean, got {s:?}")),
            },
        }
    }

    /// Business-key rendering. Empty text and nulls are not keys.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Null | Value::Bool(_) => None,
            Value::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => other.as_text(),
        }
    }
}

fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ---------------------------------------------------------------------------
// Record sets
// ---------------------------------------------------------------------------

/// Ordered rows sharing one ordered list of uniquely named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    /// Blank headers become `Unnamed: N`; repeated headers get `.1`, `.2`, ...
    /// Headers that differ only by case count as repeats: SQL identifiers
    /// are case-insensitive.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: unique_columns(columns),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut set = Self::new(columns);
        for row in rows {
            set.push_row(row);
        }
        set
    }

    /// Build from JSON objects. Columns are the union of keys in first-seen
    /// order; keys missing from an object are null.
    pub fn from_json_objects<'a>(
        objects: impl IntoIterator<Item = &'a serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        let objects: Vec<_> = objects.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = objects
            .iter()
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Short rows are padded with nulls, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Same rows under new column names. Callers guarantee uniqueness.
    pub(crate) fn with_columns(&self, columns: Vec<String>) -> Self {
        debug_assert_eq!(columns.len(), self.columns.len());
        Self {
            columns,
            rows: self.rows.clone(),
        }
    }

    /// Set `column` to `value` on every row, replacing an existing column of
    /// that name.
    pub fn stamp_column(&mut self, column: &str, value: Value) {
        match self.column_index(column) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }
}

fn unique_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(columns.len());
    for (idx, raw) in columns.into_iter().enumerate() {
        let base = if raw.trim().is_empty() {
            format!("Unnamed: {idx}")
        } else {
            raw
        };
        let folded = base.to_lowercase();
        let mut name = base.clone();
        while seen.contains_key(&name.to_lowercase()) {
            let n = seen.entry(folded.clone()).or_insert(0);
            *n += 1;
            name = format!("{base}.{n}");
        }
        seen.insert(name.to_lowercase(), 0);
        out.push(name);
    }
    out
}

/// A decoded sheet of a multi-sheet workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub records: RecordSet,
}

/// What the loader hands back: one record set, or one per sheet in workbook
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Single(RecordSet),
    Sheets(Vec<Sheet>),
}

impl Loaded {
    pub fn record_count(&self) -> usize {
        match self {
            Loaded::Single(records) => records.len(),
            Loaded::Sheets(sheets) => sheets.iter().map(|s| s.records.len()).sum(),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// One normalized row, split into its business key and the remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub key: String,
    pub fields: Vec<(String, Value)>,
}

impl CanonicalRecord {
    /// `row` is zero-based; errors report it one-based.
    pub fn from_row(
        records: &RecordSet,
        row: usize,
        entity: &str,
        key_field: &str,
    ) -> Result<Self, IngestError> {
        let missing = || IngestError::MissingKey {
            entity: entity.to_string(),
            field: key_field.to_string(),
            row: row + 1,
        };
        let values = records.rows().get(row).ok_or_else(missing)?;
        let key_idx = records.column_index(key_field).ok_or_else(missing)?;
        let key = values[key_idx].key_string().ok_or_else(missing)?;

        let fields = records
            .columns()
            .iter()
            .zip(values)
            .enumerate()
            .filter(|(idx, _)| *idx != key_idx)
            .map(|(_, (name, value))| (name.clone(), value.clone()))
            .collect();

        Ok(Self { key, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_types() {
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("42"), Value::Int(42));
        assert_eq!(Value::infer("-7"), Value::Int(-7));
        assert_eq!(Value::infer("3.5"), Value::Float(3.5));
        assert_eq!(Value::infer("0.25"), Value::Float(0.25));
        assert_eq!(Value::infer("0"), Value::Int(0));
        assert_eq!(Value::infer("02134"), Value::Text("02134".into()));
        assert_eq!(Value::infer("a@x.com"), Value::Text("a@x.com".into()));
        assert_eq!(Value::infer("inf"), Value::Text("inf".into()));
        assert_eq!(Value::infer("NaN"), Value::Text("NaN".into()));
    }

    #[test]
    fn integer_conversion() {
        assert_eq!(Value::Float(12.0).as_i64(), Ok(Some(12)));
        assert_eq!(Value::Text(" 12 ".into()).as_i64(), Ok(Some(12)));
        assert_eq!(Value::Text("".into()).as_i64(), Ok(None));
        assert!(Value::Float(1.5).as_i64().is_err());
        assert!(Value::Text("twelve".into()).as_i64().is_err());
    }

    #[test]
    fn bool_conversion() {
        assert_eq!(Value::Int(0).as_bool(), Ok(Some(false)));
        assert_eq!(Value::Int(3).as_bool(), Ok(Some(true)));
        assert_eq!(Value::Text("Yes".into()).as_bool(), Ok(Some(true)));
        assert!(Value::Text("maybe".into()).as_bool().is_err());
    }

    #[test]
    fn key_rendering() {
        assert_eq!(Value::Text("  a@x.com ".into()).key_string().as_deref(), Some("a@x.com"));
        assert_eq!(Value::Float(17.0).key_string().as_deref(), Some("17"));
        assert_eq!(Value::Text("   ".into()).key_string(), None);
        assert_eq!(Value::Null.key_string(), None);
    }

    #[test]
    fn headers_are_made_unique() {
        let set = RecordSet::new(vec!["a".into(), "a".into(), "".into(), "a".into()]);
        assert_eq!(set.columns(), &["a", "a.1", "Unnamed: 2", "a.2"]);
    }

    #[test]
    fn headers_differing_only_by_case_are_repeats() {
        let set = RecordSet::new(vec!["Clicks".into(), "clicks".into(), "CLICKS".into()]);
        assert_eq!(set.columns(), &["Clicks", "clicks.1", "CLICKS.2"]);
    }

    #[test]
    fn rows_are_padded_to_width() {
        let mut set = RecordSet::new(vec!["a".into(), "b".into()]);
        set.push_row(vec![Value::Int(1)]);
        assert_eq!(set.rows()[0], vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn stamp_replaces_existing_column() {
        let mut set = RecordSet::with_rows(
            vec!["a".into(), "ts".into()],
            vec![vec![Value::Int(1), Value::Text("old".into())]],
        );
        set.stamp_column("ts", Value::Text("new".into()));
        assert_eq!(set.columns().len(), 2);
        assert_eq!(set.get(0, "ts"), Some(&Value::Text("new".into())));

        set.stamp_column("extra", Value::Bool(true));
        assert_eq!(set.columns(), &["a", "ts", "extra"]);
    }

    #[test]
    fn json_objects_union_columns() {
        let a: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"id": 1, "name": "x"}"#).unwrap();
        let b: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"id": 2, "url": "http://y"}"#).unwrap();
        let set = RecordSet::from_json_objects([&a, &b]);
        assert_eq!(set.columns(), &["id", "name", "url"]);
        assert_eq!(set.get(1, "name"), Some(&Value::Null));
        assert_eq!(set.get(1, "url"), Some(&Value::Text("http://y".into())));
    }

    #[test]
    fn canonical_record_requires_key() {
        let set = RecordSet::with_rows(
            vec!["email".into(), "name".into()],
            vec![
                vec![Value::Text("a@x.com".into()), Value::Text("Eng".into())],
                vec![Value::Null, Value::Text("Ops".into())],
            ],
        );
        let rec = CanonicalRecord::from_row(&set, 0, "department", "email").unwrap();
        assert_eq!(rec.key, "a@x.com");
        assert_eq!(rec.fields, vec![("name".to_string(), Value::Text("Eng".into()))]);

        let err = CanonicalRecord::from_row(&set, 1, "department", "email").unwrap_err();
        assert!(matches!(err, IngestError::MissingKey { row: 2, .. }));

        let err = CanonicalRecord::from_row(&set, 0, "site", "source_id").unwrap_err();
        assert!(matches!(err, IngestError::MissingKey { .. }));
    }
}
