//! Keyed create-or-update of canonical records.

use std::collections::HashSet;

use serde::Deserialize;

use crate::entity::Entity;
use crate::error::IngestError;
use crate::model::{CanonicalRecord, RecordSet};
use crate::store::Store;

/// When pending entity writes are committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// One transaction per record: a failure leaves every earlier record
    /// durably written.
    #[default]
    PerRecord,
    /// One transaction for the whole record set, committed at the end.
    Batch,
}

/// A record the reconciler refused, with its one-based row number.
#[derive(Debug)]
pub struct Rejection {
    pub row: usize,
    pub error: IngestError,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub entity: String,
    pub created: usize,
    pub updated: usize,
    pub rejected: Vec<Rejection>,
}

impl ReconcileReport {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.rejected.len()
    }
}

enum Outcome {
    Created,
    Updated,
}

pub struct UpsertReconciler<'a, S: Store> {
    store: &'a mut S,
    mode: CommitMode,
}

impl<'a, S: Store> UpsertReconciler<'a, S> {
    pub fn new(store: &'a mut S, mode: CommitMode) -> Self {
        Self { store, mode }
    }

    /// Upsert every row of `records` (already normalized) as `E`, in input
    /// order. A repeated key within one batch is last-write-wins.
    ///
    /// Only a failed final commit in [`CommitMode::Batch`] is returned as an
    /// error; record-level failures land in [`ReconcileReport::rejected`].
    pub fn reconcile<E: Entity>(&mut self, records: &RecordSet) -> Result<ReconcileReport, IngestError> {
        let mut report = ReconcileReport {
            entity: E::NAME.to_string(),
            ..Default::default()
        };

        let ignored: Vec<&str> = records
            .columns()
            .iter()
            .map(String::as_str)
            .filter(|c| *c != E::KEY_FIELD && E::field(c).is_none())
            .collect();
        if !ignored.is_empty() {
            log::debug!("{}: ignoring columns without a field: {}", E::NAME, ignored.join(", "));
        }
        let ignored: HashSet<&str> = ignored.into_iter().collect();

        for row in 0..records.len() {
            match self.upsert_one::<E>(records, row, &ignored) {
                Ok(Outcome::Created) => report.created += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Err(error) => {
                    log::warn!("{}: rejected row {}: {error}", E::NAME, row + 1);
                    if self.mode == CommitMode::PerRecord {
                        self.store.rollback()?;
                    }
                    report.rejected.push(Rejection { row: row + 1, error });
                }
            }
        }

        if self.mode == CommitMode::Batch {
            if let Err(e) = self.store.commit() {
                // best effort: the transaction is already lost
                let _ = self.store.rollback();
                return Err(e);
            }
        }

        log::info!(
            "{}: {} created, {} updated, {} rejected",
            E::NAME,
            report.created,
            report.updated,
            report.rejected.len()
        );
        Ok(report)
    }

    fn upsert_one<E: Entity>(
        &mut self,
        records: &RecordSet,
        row: usize,
        ignored: &HashSet<&str>,
    ) -> Result<Outcome, IngestError> {
        let record = CanonicalRecord::from_row(records, row, E::NAME, E::KEY_FIELD)?;
        let fresh = E::from_key(&record.key).map_err(|message| IngestError::InvalidField {
            entity: E::NAME.to_string(),
            field: E::KEY_FIELD.to_string(),
            message,
        })?;

        let existing = self.store.find_by_key::<E>(&fresh.key())?;
        let is_new = existing.is_none();
        let mut entity = existing.unwrap_or(fresh);

        for (name, value) in &record.fields {
            if ignored.contains(name.as_str()) {
                continue;
            }
            if let Some(setter) = E::field(name) {
                (setter.apply)(&mut entity, value).map_err(|message| IngestError::InvalidField {
                    entity: E::NAME.to_string(),
                    field: name.clone(),
                    message,
                })?;
            }
        }

        let outcome = if is_new {
            self.store.create(entity)?;
            Outcome::Created
        } else {
            self.store.update(&entity)?;
            Outcome::Updated
        };

        if self.mode == CommitMode::PerRecord {
            self.store.commit()?;
        }
        Ok(outcome)
    }
}
