// Columnar (Parquet) import via the row-level record API

use std::fs::File;
use std::path::Path;

use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;

use crate::error::IngestError;
use crate::model::{RecordSet, Value};

use super::load_error;

pub(super) fn read(path: &Path) -> Result<RecordSet, IngestError> {
    let file = File::open(path).map_err(|e| load_error(path, e))?;
    let reader = SerializedFileReader::new(file)
        .map_err(|e| load_error(path, format!("not a parquet file: {e}")))?;

    let columns: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema()
        .get_fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let mut set = RecordSet::new(columns);
    let rows = reader.get_row_iter(None).map_err(|e| load_error(path, e))?;
    for row in rows {
        let row = row.map_err(|e| load_error(path, e))?;
        set.push_row(row.get_column_iter().map(|(_, field)| field_value(field)).collect());
    }
    Ok(set)
}

fn field_value(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(n) => Value::Int(i64::from(*n)),
        Field::Short(n) => Value::Int(i64::from(*n)),
        Field::Int(n) => Value::Int(i64::from(*n)),
        Field::Long(n) => Value::Int(*n),
        Field::UByte(n) => Value::Int(i64::from(*n)),
        Field::UShort(n) => Value::Int(i64::from(*n)),
        Field::UInt(n) => Value::Int(i64::from(*n)),
        Field::ULong(n) => i64::try_from(*n)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(n.to_string())),
        Field::Float(n) => Value::Float(f64::from(*n)),
        Field::Double(n) => Value::Float(*n),
        Field::Str(s) if s.is_empty() => Value::Null,
        Field::Str(s) => Value::Text(s.clone()),
        // Dates, timestamps, decimals and nested values keep their display form
        other => Value::Text(other.to_string()),
    }
}
