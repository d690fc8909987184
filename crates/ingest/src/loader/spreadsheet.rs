// Excel / ODS import via calamine

use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDate};

use crate::error::IngestError;
use crate::model::{Loaded, RecordSet, Sheet, Value};

use super::{load_error, SheetSelection};

pub(super) fn read(path: &Path, selection: &SheetSelection) -> Result<Loaded, IngestError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| load_error(path, format!("failed to open workbook: {e}")))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(load_error(path, "workbook contains no sheets"));
    }

    let mut read_sheet = |name: &str| -> Result<RecordSet, IngestError> {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| load_error(path, format!("failed to read sheet '{name}': {e}")))?;
        Ok(range_to_records(&range))
    };

    match selection {
        SheetSelection::All => {
            let mut sheets = Vec::with_capacity(sheet_names.len());
            for name in &sheet_names {
                sheets.push(Sheet {
                    name: name.clone(),
                    records: read_sheet(name)?,
                });
            }
            Ok(Loaded::Sheets(sheets))
        }
        SheetSelection::First => Ok(Loaded::Single(read_sheet(&sheet_names[0])?)),
        SheetSelection::Named(name) => {
            if !sheet_names.iter().any(|s| s == name) {
                return Err(load_error(
                    path,
                    format!("no sheet named '{name}' (sheets: {})", sheet_names.join(", ")),
                ));
            }
            Ok(Loaded::Single(read_sheet(name)?))
        }
    }
}

/// First row of the used range is the header. Fully blank rows are skipped.
fn range_to_records(range: &Range<Data>) -> RecordSet {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return RecordSet::default();
    };

    let mut set = RecordSet::new(header.iter().map(header_text).collect());
    for row in rows {
        let values: Vec<Value> = row.iter().map(cell_value).collect();
        if values.iter().all(Value::is_null) {
            continue;
        }
        set.push_row(values);
    }
    set
}

fn header_text(cell: &Data) -> String {
    cell_value(cell).as_text().unwrap_or_default()
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                Value::Int(*n as i64)
            } else {
                Value::Float(*n)
            }
        }
        Data::Int(n) => Value::Int(*n),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64())
            .map(Value::Text)
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(e) => {
            log::debug!("spreadsheet cell error {:?} read as null", e);
            Value::Null
        }
    }
}

/// Render an Excel 1900-system serial as `YYYY-MM-DD`, or
/// `YYYY-MM-DD HH:MM:SS` when it carries a time of day.
fn excel_serial_to_text(serial: f64) -> Option<String> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    let dt = epoch.checked_add_signed(Duration::milliseconds(millis))?;
    if serial.fract().abs() < 1e-9 {
        Some(dt.format("%Y-%m-%d").to_string())
    } else {
        Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn write_two_sheet_workbook(path: &Path) {
        let mut workbook = Workbook::new();

        let people = workbook.add_worksheet();
        people.set_name("Sheet1").unwrap();
        people.write_string(0, 0, "email").unwrap();
        people.write_string(0, 1, "employee_id").unwrap();
        people.write_string(0, 2, "first_name").unwrap();
        people.write_string(1, 0, "ann@x.com").unwrap();
        people.write_number(1, 1, 7.0).unwrap();
        people.write_string(1, 2, "Ann").unwrap();

        let departments = workbook.add_worksheet();
        departments.set_name("Sheet1 (2)").unwrap();
        departments.write_string(0, 0, "department_email").unwrap();
        departments.write_string(0, 1, "department_budget").unwrap();
        departments.write_string(1, 0, "eng@x.com").unwrap();
        departments.write_number(1, 1, 1250.5).unwrap();
        // blank row in between is skipped
        departments.write_string(3, 0, "ops@x.com").unwrap();

        workbook.save(path).unwrap();
    }

    #[test]
    fn all_sheets_in_workbook_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people_in_department_merged.xlsx");
        write_two_sheet_workbook(&path);

        let Loaded::Sheets(sheets) = read(&path, &SheetSelection::All).unwrap() else {
            panic!("expected sheets");
        };
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name, "Sheet1");
        assert_eq!(sheets[1].name, "Sheet1 (2)");

        let people = &sheets[0].records;
        assert_eq!(people.columns(), &["email", "employee_id", "first_name"]);
        assert_eq!(people.get(0, "employee_id"), Some(&Value::Int(7)));

        let departments = &sheets[1].records;
        assert_eq!(departments.len(), 2);
        assert_eq!(departments.get(0, "department_budget"), Some(&Value::Float(1250.5)));
        assert_eq!(departments.get(1, "department_email"), Some(&Value::Text("ops@x.com".into())));
    }

    #[test]
    fn first_and_named_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        write_two_sheet_workbook(&path);

        let Loaded::Single(first) = read(&path, &SheetSelection::First).unwrap() else {
            panic!("expected single");
        };
        assert_eq!(first.columns()[0], "email");

        let named = SheetSelection::Named("Sheet1 (2)".into());
        let Loaded::Single(second) = read(&path, &named).unwrap() else {
            panic!("expected single");
        };
        assert_eq!(second.columns()[0], "department_email");

        let missing = SheetSelection::Named("Nope".into());
        let err = read(&path, &missing).unwrap_err();
        assert!(err.to_string().contains("no sheet named 'Nope'"));
    }

    #[test]
    fn corrupt_workbook_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            read(&path, &SheetSelection::All),
            Err(IngestError::Load { .. })
        ));
    }

    #[test]
    fn excel_serials() {
        assert_eq!(excel_serial_to_text(45292.0).as_deref(), Some("2024-01-01"));
        assert_eq!(excel_serial_to_text(45292.5).as_deref(), Some("2024-01-01 12:00:00"));
    }
}
