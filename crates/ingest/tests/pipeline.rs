// End-to-end runs of the ingest half of the pipeline against staged fixtures.
// Run with: cargo test -p rawsync-ingest --test pipeline

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rawsync_ingest::entity::{Department, Person};
use rawsync_ingest::routing::UnknownSheetPolicy;
use rawsync_ingest::{
    IngestError, Pipeline, PipelineConfig, RemoteEntry, RemoteSource, SqliteStore, Store,
    TargetAction, Value,
};
use rust_xlsxwriter::Workbook;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Workspace {
    dir: TempDir,
    config: PipelineConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.staging_dir = dir.path().join("files");
        config.paths.lock_file = dir.path().join("rawsync.lock");
        config.database.path = dir.path().join("rawsync.db");
        fs::create_dir_all(&config.paths.staging_dir).unwrap();
        Self { dir, config }
    }

    fn staged(&self, name: &str) -> PathBuf {
        self.config.paths.staging_dir.join(name)
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(&self.config).unwrap()
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::open(&self.config.database.path).unwrap()
    }
}

fn write_department_workbook(path: &Path, name: &str) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Sheet1").unwrap();
    sheet.write_string(0, 0, "department_email").unwrap();
    sheet.write_string(0, 1, "department_name").unwrap();
    sheet.write_string(1, 0, "a@x.com").unwrap();
    sheet.write_string(1, 1, name).unwrap();
    workbook.save(path).unwrap();
}

fn department(store: &mut SqliteStore, email: &str) -> Department {
    let found = store
        .find_by_key::<Department>(&Value::Text(email.into()))
        .unwrap()
        .unwrap_or_else(|| panic!("no department {email}"));
    store.commit().unwrap();
    found
}

// ---------------------------------------------------------------------------
// Upsert scenarios
// ---------------------------------------------------------------------------

#[test]
fn department_workbook_rerun_updates_in_place() {
    let ws = Workspace::new();
    write_department_workbook(&ws.staged("department.xlsx"), "Eng");

    let mut store = ws.store();
    let first = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!((first.created(), first.updated()), (1, 0));
    assert_eq!(department(&mut store, "a@x.com").name.as_deref(), Some("Eng"));

    write_department_workbook(&ws.staged("department.xlsx"), "Engineering");
    let second = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!((second.created(), second.updated()), (0, 1));

    assert_eq!(store.count_rows("departments").unwrap(), 1);
    assert_eq!(
        department(&mut store, "a@x.com").name.as_deref(),
        Some("Engineering")
    );
}

#[test]
fn merged_workbook_routes_each_sheet() {
    let ws = Workspace::new();
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
    departments.write_string(0, 1, "department_head").unwrap();
    departments.write_string(1, 0, "eng@x.com").unwrap();
    departments.write_string(1, 1, "Ann").unwrap();
    let extra = workbook.add_worksheet();
    extra.set_name("Notes").unwrap();
    extra.write_string(0, 0, "text").unwrap();
    extra.write_string(1, 0, "ignore me").unwrap();
    workbook
        .save(ws.staged("people_in_department_merged.xlsx"))
        .unwrap();

    let mut store = ws.store();
    let report = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(report.created(), 2);
    assert_eq!(report.rejected_sheets(), 1);
    assert_eq!(report.failed_files(), 0);

    let ann = store
        .find_by_key::<Person>(&Value::Text("ann@x.com".into()))
        .unwrap()
        .unwrap();
    store.commit().unwrap();
    assert_eq!(ann.source_id, Some(7));
    assert_eq!(ann.first_name.as_deref(), Some("Ann"));
    assert_eq!(department(&mut store, "eng@x.com").head.as_deref(), Some("Ann"));
}

#[test]
fn unknown_sheets_can_be_appended() {
    let mut ws = Workspace::new();
    ws.config.routing.unknown_sheets = UnknownSheetPolicy::Append;
    ws.config.routing.multi_sheet.insert(
        "budget".into(),
        BTreeMap::from([("Depts".to_string(), "department".to_string())]),
    );

    let mut workbook = Workbook::new();
    let depts = workbook.add_worksheet();
    depts.set_name("Depts").unwrap();
    depts.write_string(0, 0, "email").unwrap();
    depts.write_string(1, 0, "ops@x.com").unwrap();
    let other = workbook.add_worksheet();
    other.set_name("Q1 Totals").unwrap();
    other.write_string(0, 0, "total").unwrap();
    other.write_number(1, 0, 10.0).unwrap();
    other.write_number(2, 0, 20.0).unwrap();
    workbook.save(ws.staged("budget.xlsx")).unwrap();

    let mut store = ws.store();
    let report = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(report.created(), 1);
    assert_eq!(report.appended(), 2);
    assert_eq!(store.count_rows("budget__q1_totals").unwrap(), 2);
}

#[test]
fn missing_keys_are_rejected_without_stopping() {
    let ws = Workspace::new();
    fs::write(
        ws.staged("department.csv"),
        "department_email,department_name\na@x.com,Eng\n,Nameless\nb@x.com,Ops\n",
    )
    .unwrap();

    let mut store = ws.store();
    let report = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(report.created(), 2);
    assert_eq!(report.rejected_records(), 1);

    let target = &report.files[0].targets[0];
    match &target.action {
        TargetAction::Upserted(r) => {
            assert_eq!(r.rejected[0].row, 2);
            assert!(matches!(r.rejected[0].error, IngestError::MissingKey { .. }));
        }
        other => panic!("expected an upsert, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Append scenarios
// ---------------------------------------------------------------------------

#[test]
fn ads_click_is_appended_under_canonical_columns() {
    let ws = Workspace::new();
    fs::write(ws.staged("ads_click.csv"), "ad_id,clicked_at\n10,2024-01-01\n11,2024-01-02\n").unwrap();

    let mut store = ws.store();
    let report = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(report.appended(), 2);

    let columns = store.table_columns("ads_click").unwrap();
    assert!(columns.contains(&"source_id".to_string()));
    assert!(!columns.contains(&"ad_id".to_string()));
    assert!(columns.contains(&"raw_create_date".to_string()));
}

#[test]
fn multi_sheet_ads_workbook_keeps_the_file_renames() {
    let ws = Workspace::new();
    let mut workbook = Workbook::new();
    for (name, ad) in [("Jan", 10.0), ("Feb", 11.0)] {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name).unwrap();
        sheet.write_string(0, 0, "ad_id").unwrap();
        sheet.write_number(1, 0, ad).unwrap();
    }
    workbook.save(ws.staged("ads_click.xlsx")).unwrap();

    let mut store = ws.store();
    let report = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(report.appended(), 2);
    for table in ["ads_click__jan", "ads_click__feb"] {
        assert_eq!(
            store.table_columns(table).unwrap(),
            vec!["source_id", "raw_create_date"],
            "{table}"
        );
    }
}

#[test]
fn appending_twice_doubles_the_rows() {
    let ws = Workspace::new();
    fs::write(ws.staged("number_of_clicks_daily.csv"), "user_id,clicks\n1,5\n2,9\n").unwrap();

    let mut store = ws.store();
    ws.pipeline().ingest_staged(&mut store).unwrap();
    ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(store.count_rows("number_of_clicks_daily").unwrap(), 4);
}

#[test]
fn jsonl_and_unsupported_files_side_by_side() {
    let ws = Workspace::new();
    fs::write(ws.staged("events.jsonl"), "{\"kind\":\"open\"}\n{\"kind\":\"close\"}\n").unwrap();
    fs::write(ws.staged("readme.pdf"), b"%PDF").unwrap();

    let mut store = ws.store();
    let report = ws.pipeline().ingest_staged(&mut store).unwrap();
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.failed_files(), 1);
    assert_eq!(store.count_rows("events").unwrap(), 2);
}

// ---------------------------------------------------------------------------
// Full run with an in-memory remote
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryRemote {
    files: Vec<(String, Vec<u8>)>,
    closed: bool,
}

impl RemoteSource for MemoryRemote {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, IngestError> {
        Ok(self
            .files
            .iter()
            .map(|(name, content)| RemoteEntry {
                name: name.clone(),
                path: format!("{dir}{name}"),
                size: Some(content.len() as u64),
                is_dir: false,
            })
            .collect())
    }

    fn fetch(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, IngestError> {
        let (_, content) = self
            .files
            .iter()
            .find(|(name, _)| path.ends_with(name.as_str()))
            .ok_or_else(|| IngestError::Transfer(format!("no such file {path}")))?;
        out.write_all(content)?;
        Ok(content.len() as u64)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[test]
fn full_run_stages_and_ingests() {
    let ws = Workspace::new();
    let mut remote = MemoryRemote {
        files: vec![
            (
                "department.csv".into(),
                b"department_email,department_size\nhr@x.com,4\n".to_vec(),
            ),
            ("revenue_from_ads.csv".into(), b"user_id,revenue\n3,1.25\n".to_vec()),
        ],
        closed: false,
    };

    let mut store = ws.store();
    let report = ws.pipeline().run(&mut remote, &mut store).unwrap();
    assert!(remote.closed);
    assert_eq!(report.transfer.as_ref().unwrap().staged.len(), 2);
    assert_eq!(report.created(), 1);
    assert_eq!(report.appended(), 1);
    assert_eq!(department(&mut store, "hr@x.com").size, Some(4));
    assert!(ws.staged("revenue_from_ads.csv").exists());
    assert!(!ws.dir.path().join("rawsync.lock").exists());
}
