//! Run driver: lock → transfer → ingest every staged file.
//!
//! Failures scoped to one file or sheet are recorded in its [`FileOutcome`]
//! and the run moves on. Only fatal errors (lock held, remote listing,
//! upstream API) come back as `Err`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::append::BulkAppender;
use crate::config::PipelineConfig;
use crate::entity::{Department, EntityKind, Person, Site};
use crate::error::IngestError;
use crate::loader::{self, ReadOptions};
use crate::lock::RunLock;
use crate::model::{Loaded, RecordSet};
use crate::normalize::ColumnNormalizer;
use crate::reconcile::{CommitMode, ReconcileReport, UpsertReconciler};
use crate::routing::{file_stem, slug, EntityRouter, RoutingOutcome, SheetRoute};
use crate::sites::{collect_sites, SitesClient};
use crate::store::Store;
use crate::transfer::{FileTransferAgent, RemoteSource, TransferReport};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TargetAction {
    Upserted(ReconcileReport),
    Appended(usize),
    /// Sheet not in the routing table under the `reject` policy.
    Rejected,
    Failed(IngestError),
}

/// What happened to one record set (a whole file, or one sheet of it).
#[derive(Debug)]
pub struct TargetOutcome {
    pub sheet: Option<String>,
    /// Entity or table name the records were routed to.
    pub target: String,
    pub action: TargetAction,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub file: String,
    pub targets: Vec<TargetOutcome>,
    /// Set when the file could not be loaded at all.
    pub error: Option<IngestError>,
}

impl FileOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
            || self
                .targets
                .iter()
                .any(|t| matches!(t.action, TargetAction::Failed(_)))
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transfer: Option<TransferReport>,
    pub files: Vec<FileOutcome>,
}

impl RunReport {
    fn start() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            transfer: None,
            files: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    fn upserts(&self) -> impl Iterator<Item = &ReconcileReport> {
        self.files
            .iter()
            .flat_map(|f| &f.targets)
            .filter_map(|t| match &t.action {
                TargetAction::Upserted(report) => Some(report),
                _ => None,
            })
    }

    pub fn created(&self) -> usize {
        self.upserts().map(|r| r.created).sum()
    }

    pub fn updated(&self) -> usize {
        self.upserts().map(|r| r.updated).sum()
    }

    pub fn rejected_records(&self) -> usize {
        self.upserts().map(|r| r.rejected.len()).sum()
    }

    pub fn appended(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.targets)
            .map(|t| match t.action {
                TargetAction::Appended(n) => n,
                _ => 0,
            })
            .sum()
    }

    pub fn rejected_sheets(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.targets)
            .filter(|t| matches!(t.action, TargetAction::Rejected))
            .count()
    }

    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_failed()).count()
    }

    pub fn failed_transfers(&self) -> usize {
        self.transfer.as_ref().map_or(0, |t| t.failures.len())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: ColumnNormalizer,
    router: EntityRouter,
    agent: FileTransferAgent,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            normalizer: ColumnNormalizer::new(&config.normalize)?,
            router: config.routing.router(),
            agent: FileTransferAgent::new(&config.paths.remote_dir, &config.paths.staging_dir),
            config: config.clone(),
        })
    }

    pub fn router(&self) -> &EntityRouter {
        &self.router
    }

    /// Transfer everything from `source`, then ingest the staging directory.
    pub fn run<S: Store>(
        &self,
        source: &mut dyn RemoteSource,
        store: &mut S,
    ) -> Result<RunReport, IngestError> {
        let mut report = RunReport::start();
        log::info!("run {} started", report.run_id);
        let _lock = self.lock_or_close(&report.run_id, source)?;

        report.transfer = Some(self.transfer_into(source)?);
        self.ingest_into(store, &mut report)?;
        Ok(self.log_finished(report.finish()))
    }

    /// Transfer only.
    pub fn transfer(&self, source: &mut dyn RemoteSource) -> Result<RunReport, IngestError> {
        let mut report = RunReport::start();
        log::info!("run {} started (transfer only)", report.run_id);
        let _lock = self.lock_or_close(&report.run_id, source)?;

        report.transfer = Some(self.transfer_into(source)?);
        Ok(self.log_finished(report.finish()))
    }

    /// Ingest whatever is already in the staging directory, without network.
    pub fn ingest_staged<S: Store>(&self, store: &mut S) -> Result<RunReport, IngestError> {
        let mut report = RunReport::start();
        log::info!("run {} started (ingest only)", report.run_id);
        let _lock = self.lock(&report.run_id)?;

        self.ingest_into(store, &mut report)?;
        Ok(self.log_finished(report.finish()))
    }

    /// Sign up to the sites API, page through every site and upsert them.
    pub fn collect_sites<S: Store>(&self, store: &mut S) -> Result<ReconcileReport, IngestError> {
        let sites = &self.config.sites;
        let password = sites.password.as_deref().ok_or_else(|| {
            IngestError::Config("sites.password is not set (config or SITES_API_PASSWORD)".into())
        })?;

        let run_id = uuid::Uuid::new_v4().to_string();
        log::info!("sites run {run_id} started");
        let _lock = self.lock(&run_id)?;

        let mut client = SitesClient::new(&sites.base_url, Duration::from_secs(sites.timeout_secs))?;
        client.signup(&sites.fullname, &sites.email, password)?;
        let records = client.fetch_all(sites.batch_size)?;
        collect_sites(&records, &self.normalizer, store, self.config.database.commit_mode)
    }

    fn lock(&self, run_id: &str) -> Result<RunLock, IngestError> {
        RunLock::acquire(&self.config.paths.lock_file, run_id)
    }

    /// The source is released even when the run never starts.
    fn lock_or_close(
        &self,
        run_id: &str,
        source: &mut dyn RemoteSource,
    ) -> Result<RunLock, IngestError> {
        match self.lock(run_id) {
            Ok(lock) => Ok(lock),
            Err(e) => {
                source.close();
                Err(e)
            }
        }
    }

    fn transfer_into(&self, source: &mut dyn RemoteSource) -> Result<TransferReport, IngestError> {
        let transfer = self.agent.transfer_files(source)?;
        if let Some(partial) = transfer.partial_failure() {
            log::warn!("{partial}");
        }
        Ok(transfer)
    }

    fn log_finished(&self, report: RunReport) -> RunReport {
        log::info!(
            "run {} finished: {} file(s), {} created, {} updated, {} appended, {} failed",
            report.run_id,
            report.files.len(),
            report.created(),
            report.updated(),
            report.appended(),
            report.failed_files()
        );
        report
    }

    // ── Staged files ────────────────────────────────────────────────────

    fn ingest_into<S: Store>(&self, store: &mut S, report: &mut RunReport) -> Result<(), IngestError> {
        let files = staged_files(self.agent.staging_dir())?;
        log::info!(
            "{} staged file(s) in {}",
            files.len(),
            self.agent.staging_dir().display()
        );
        for path in files {
            report.files.push(self.ingest_file(store, &path));
        }
        Ok(())
    }

    fn ingest_file<S: Store>(&self, store: &mut S, path: &Path) -> FileOutcome {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut outcome = FileOutcome {
            file: file.clone(),
            targets: Vec::new(),
            error: None,
        };

        let loaded = match loader::read(path, &ReadOptions::default()) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("{file}: {e}");
                outcome.error = Some(e);
                return outcome;
            }
        };
        log::info!("{file}: {} record(s) loaded", loaded.record_count());
        let stem = file_stem(&file);

        match (self.router.route(&file), loaded) {
            (RoutingOutcome::Direct(entity), Loaded::Single(records)) => {
                outcome
                    .targets
                    .push(self.append_target(store, None, &entity, &entity, &records));
            }
            (RoutingOutcome::Direct(entity), Loaded::Sheets(sheets)) => {
                let single = sheets.len() == 1;
                for sheet in sheets {
                    let table = if single {
                        entity.clone()
                    } else {
                        format!("{entity}__{}", slug(&sheet.name))
                    };
                    outcome.targets.push(self.append_target(
                        store,
                        Some(sheet.name),
                        &entity,
                        &table,
                        &sheet.records,
                    ));
                }
            }
            (RoutingOutcome::MultiSheet(routes), Loaded::Single(records)) => match routes.first() {
                Some((sheet, entity)) => {
                    log::debug!("{file}: single record set, treating it as sheet '{sheet}'");
                    let sheet = sheet.to_string();
                    let entity = entity.to_string();
                    outcome.targets.push(self.route_target(
                        store,
                        Some(sheet),
                        &stem,
                        &entity,
                        &records,
                    ));
                }
                None => {
                    let e = IngestError::Config(format!("{file}: routing entry has no sheets"));
                    log::error!("{e}");
                    outcome.error = Some(e);
                }
            },
            (RoutingOutcome::MultiSheet(routes), Loaded::Sheets(sheets)) => {
                for (configured, _) in routes.sheets() {
                    if !sheets.iter().any(|s| s.name == configured) {
                        log::warn!("{file}: expected sheet '{configured}' is missing");
                    }
                }
                for sheet in sheets {
                    match routes.resolve(&sheet.name) {
                        SheetRoute::Entity(entity) => {
                            outcome.targets.push(self.route_target(
                                store,
                                Some(sheet.name),
                                &stem,
                                &entity,
                                &sheet.records,
                            ));
                        }
                        SheetRoute::Rejected => {
                            log::warn!(
                                "{file}: sheet '{}' is not in the routing table, rejected ({} rows)",
                                sheet.name,
                                sheet.records.len()
                            );
                            outcome.targets.push(TargetOutcome {
                                sheet: Some(sheet.name),
                                target: String::new(),
                                action: TargetAction::Rejected,
                            });
                        }
                    }
                }
            }
        }
        outcome
    }

    /// Upsert when `entity` names a known entity type, append otherwise.
    /// Appended sheets are normalized under the file's `stem`.
    fn route_target<S: Store>(
        &self,
        store: &mut S,
        sheet: Option<String>,
        stem: &str,
        entity: &str,
        records: &RecordSet,
    ) -> TargetOutcome {
        let Some(kind) = EntityKind::from_name(entity) else {
            return self.append_target(store, sheet, stem, entity, records);
        };

        let action = match self
            .normalizer
            .normalize(records, entity)
            .and_then(|canonical| upsert(store, kind, &canonical, self.config.database.commit_mode))
        {
            Ok(report) => TargetAction::Upserted(report),
            Err(e) => {
                log::error!("{entity}: {e}");
                TargetAction::Failed(e)
            }
        };
        TargetOutcome {
            sheet,
            target: entity.to_string(),
            action,
        }
    }

    /// Normalize `records` under the rules for `source` (the file stem) and
    /// append them to `table`, stamped with the time of the append. Entity
    /// tables only ever take keyed upserts.
    fn append_target<S: Store>(
        &self,
        store: &mut S,
        sheet: Option<String>,
        source: &str,
        table: &str,
        records: &RecordSet,
    ) -> TargetOutcome {
        let result = if let Some(kind) = EntityKind::from_name(table) {
            Err(IngestError::Persistence(format!(
                "{table} holds {kind} entities; raw rows are not appended to it"
            )))
        } else {
            self.normalizer.normalize(records, source).and_then(|canonical| {
                BulkAppender::new(store)
                    .chunk_size(self.config.append.chunk_size)
                    .timestamp_column(&self.config.append.timestamp_column)
                    .append(&canonical, table, Utc::now())
            })
        };
        let action = match result {
            Ok(written) => TargetAction::Appended(written),
            Err(e) => {
                log::error!("{table}: {e}");
                TargetAction::Failed(e)
            }
        };
        TargetOutcome {
            sheet,
            target: table.to_string(),
            action,
        }
    }
}

fn upsert<S: Store>(
    store: &mut S,
    kind: EntityKind,
    records: &RecordSet,
    mode: CommitMode,
) -> Result<ReconcileReport, IngestError> {
    let mut reconciler = UpsertReconciler::new(store, mode);
    match kind {
        EntityKind::Department => reconciler.reconcile::<Department>(records),
        EntityKind::Person => reconciler.reconcile::<Person>(records),
        EntityKind::Site => reconciler.reconcile::<Site>(records),
    }
}

/// Regular files in `dir`, sorted by name. In-flight `.part` downloads and
/// hidden files are skipped. The directory is created if absent.
pub fn staged_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    fs::create_dir_all(dir)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.ends_with(".part") {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}
