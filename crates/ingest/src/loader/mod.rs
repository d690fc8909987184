//! Tabular file loading, dispatched purely on the (case-insensitive) file
//! extension.
//!
//! | Family      | Extensions                              | Result                 |
//! |-------------|-----------------------------------------|------------------------|
//! | delimited   | `.csv` `.tsv` `.txt`                    | one record set         |
//! | spreadsheet | `.xlsx` `.xls` `.xlsm` `.xlsb` `.ods`   | one per sheet, or one  |
//! | columnar    | `.parquet` `.pq`                        | one record set         |
//! | JSON        | `.json` `.jsonl` `.ndjson`              | one record set         |
//!
//! `.xlsx` defaults to every sheet; the other spreadsheet formats default to
//! the first sheet. JSON defaults to one object per line. Anything set on
//! [`ReadOptions`] wins over these defaults.

mod delimited;
mod json;
mod columnar;
mod spreadsheet;

use std::path::Path;

use crate::error::IngestError;
use crate::model::Loaded;

pub use delimited::read_text;

/// Every extension the loader accepts, in the order reported by
/// [`IngestError::UnsupportedFormat`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".csv", ".tsv", ".txt", ".xls", ".xlsx", ".xlsm", ".xlsb", ".ods", ".parquet", ".pq",
    ".json", ".jsonl", ".ndjson",
];

/// Which sheets of a workbook to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelection {
    /// Every sheet, returned as [`Loaded::Sheets`].
    All,
    /// The first sheet, returned as [`Loaded::Single`].
    First,
    /// One sheet by name, returned as [`Loaded::Single`].
    Named(String),
}

/// Caller overrides. `None` means "use the per-extension default".
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub sheets: Option<SheetSelection>,
    pub delimiter: Option<u8>,
    pub json_lines: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `None` delimiter means sniff it from the content.
    Delimited(Option<u8>),
    Spreadsheet { all_sheets: bool },
    Parquet,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let format = match ext.as_str() {
            "csv" => Format::Delimited(Some(b',')),
            "tsv" => Format::Delimited(Some(b'\t')),
            "txt" => Format::Delimited(None),
            "xlsx" => Format::Spreadsheet { all_sheets: true },
            "xls" | "xlsm" | "xlsb" | "ods" => Format::Spreadsheet { all_sheets: false },
            "parquet" | "pq" => Format::Parquet,
            "json" | "jsonl" | "ndjson" => Format::Json,
            _ => {
                return Err(IngestError::UnsupportedFormat {
                    extension: if ext.is_empty() { ext } else { format!(".{ext}") },
                    supported: SUPPORTED_EXTENSIONS.to_vec(),
                })
            }
        };
        Ok(format)
    }
}

/// Decode `path` into one or more record sets.
pub fn read(path: &Path, options: &ReadOptions) -> Result<Loaded, IngestError> {
    let format = Format::from_path(path)?;
    log::debug!("reading {} as {:?}", path.display(), format);

    let loaded = match format {
        Format::Delimited(default_delimiter) => {
            let delimiter = options.delimiter.or(default_delimiter);
            Loaded::Single(delimited::read(path, delimiter)?)
        }
        Format::Spreadsheet { all_sheets } => {
            let default = if all_sheets {
                SheetSelection::All
            } else {
                SheetSelection::First
            };
            let selection = options.sheets.clone().unwrap_or(default);
            spreadsheet::read(path, &selection)?
        }
        Format::Parquet => Loaded::Single(columnar::read(path)?),
        Format::Json => Loaded::Single(json::read(path, options.json_lines.unwrap_or(true))?),
    };
    Ok(loaded)
}

fn load_error(path: &Path, message: impl std::fmt::Display) -> IngestError {
    IngestError::Load {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}
