// Delimited text (CSV / TSV / plain text)

use std::path::Path;

use crate::error::IngestError;
use crate::model::{RecordSet, Value};

use super::load_error;

const CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];
const SNIFF_LINES: usize = 10;

/// Read a delimited file whose first row is the header. `None` sniffs the
/// delimiter from the first lines.
pub(super) fn read(path: &Path, delimiter: Option<u8>) -> Result<RecordSet, IngestError> {
    let content = read_text(path)?;
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(&content));
    parse(&content, delimiter).map_err(|e| load_error(path, e))
}

fn parse(content: &str, delimiter: u8) -> Result<RecordSet, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut set = RecordSet::new(headers);

    for result in reader.records() {
        let record = result?;
        set.push_row(record.iter().map(Value::infer).collect());
    }
    Ok(set)
}

/// Pick the candidate that splits the header into at least two columns and
/// keeps that width over the sampled lines. Wider headers score higher; the
/// earlier candidate wins a tie. Falls back to comma.
fn sniff_delimiter(content: &str) -> u8 {
    let sample = content
        .lines()
        .take(SNIFF_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    let mut best = (0usize, b',');
    for delimiter in CANDIDATES {
        let widths = field_widths(&sample, delimiter);
        let Some(&header) = widths.first() else {
            continue;
        };
        if header < 2 {
            continue;
        }
        let score = widths.iter().filter(|&&w| w == header).count() * header;
        if score > best.0 {
            best = (score, delimiter);
        }
    }
    best.1
}

/// Field count of each sampled record; unparsable records count as one field.
fn field_widths(sample: &str, delimiter: u8) -> Vec<usize> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample.as_bytes())
        .records()
        .map(|record| record.map_or(1, |r| r.len()))
        .collect()
}

/// Decode a text file. A byte-order mark selects the encoding and is dropped;
/// otherwise the bytes are UTF-8, or Windows-1252 when they are not valid
/// UTF-8 (spreadsheet exports).
pub fn read_text(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path).map_err(|e| load_error(path, e))?;
    let (encoding, body) = match encoding_rs::Encoding::for_bom(&bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None if std::str::from_utf8(&bytes).is_ok() => (encoding_rs::UTF_8, &bytes[..]),
        None => (encoding_rs::WINDOWS_1252, &bytes[..]),
    };
    let (text, _) = encoding.decode_without_bom_handling(body);
    Ok(text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_header_and_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ads_click.csv");
        std::fs::write(&path, "ad_id,clicks,ctr,label\n17,3,0.5,promo\n18,,0.25,\n").unwrap();

        let set = read(&path, Some(b',')).unwrap();
        assert_eq!(set.columns(), &["ad_id", "clicks", "ctr", "label"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(0, "ad_id"), Some(&Value::Int(17)));
        assert_eq!(set.get(0, "ctr"), Some(&Value::Float(0.5)));
        assert_eq!(set.get(1, "clicks"), Some(&Value::Null));
        assert_eq!(set.get(1, "label"), Some(&Value::Null));
    }

    #[test]
    fn ragged_rows_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        std::fs::write(&path, "a,b,c\n1\n1,2,3,4\n").unwrap();
        let set = read(&path, Some(b',')).unwrap();
        assert_eq!(set.rows()[0], vec![Value::Int(1), Value::Null, Value::Null]);
        assert_eq!(set.rows()[1].len(), 3);
    }

    #[test]
    fn sniffs_tab_and_semicolon() {
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n"), b'\t');
        assert_eq!(sniff_delimiter("a;b\n1;2\n"), b';');
        assert_eq!(sniff_delimiter("a,b\n1,2\n"), b',');
        assert_eq!(sniff_delimiter("single\n"), b',');
    }

    #[test]
    fn bom_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.csv");
        std::fs::write(&path, "\u{feff}email,name\na@x.com,Eng\n").unwrap();
        let set = read(&path, Some(b',')).unwrap();
        assert_eq!(set.columns()[0], "email");
    }

    #[test]
    fn windows_1252_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.csv");
        // "café" with 0xE9
        std::fs::write(&path, b"name\ncaf\xe9\n").unwrap();
        let set = read(&path, Some(b',')).unwrap();
        assert_eq!(set.get(0, "name"), Some(&Value::Text("café".into())));
    }

    #[test]
    fn utf16_bom_selects_the_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.csv");
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "kind;n\nopen;2\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        std::fs::write(&path, bytes).unwrap();
        let set = read(&path, None).unwrap();
        assert_eq!(set.columns(), &["kind", "n"]);
        assert_eq!(set.get(0, "n"), Some(&Value::Int(2)));
    }
}
