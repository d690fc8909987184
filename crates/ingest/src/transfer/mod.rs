//! Remote → staging directory transfer.
//!
//! List once → download every regular file to `<name>.part` while hashing
//! (BLAKE3) → atomic rename. A file that fails is logged, cleaned up and
//! reported; the rest of the batch carries on. Every run re-downloads and
//! overwrites everything it lists.

mod sftp;

pub use sftp::SftpSource;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::IngestError;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub size: Option<u64>,
    pub is_dir: bool,
}

/// A remote file server, opened and authenticated by its constructor.
pub trait RemoteSource {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, IngestError>;

    /// Stream the remote file into `out`; returns bytes copied.
    fn fetch(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, IngestError>;

    /// Release the connection. Must be safe to call more than once.
    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub blake3: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct TransferReport {
    pub staged: Vec<StagedFile>,
    pub failures: Vec<TransferFailure>,
    pub skipped_dirs: usize,
}

impl TransferReport {
    pub fn attempted(&self) -> usize {
        self.staged.len() + self.failures.len()
    }

    /// `PartialTransfer` when at least one download failed.
    pub fn partial_failure(&self) -> Option<IngestError> {
        (!self.failures.is_empty()).then(|| IngestError::PartialTransfer {
            failed: self.failures.len(),
            total: self.attempted(),
        })
    }
}

pub struct FileTransferAgent {
    remote_dir: String,
    staging_dir: PathBuf,
}

impl FileTransferAgent {
    pub fn new(remote_dir: &str, staging_dir: &Path) -> Self {
        Self {
            remote_dir: remote_dir.to_string(),
            staging_dir: staging_dir.to_path_buf(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Copy every file under the remote directory into the staging
    /// directory. The source is closed on every exit path.
    pub fn transfer_files(
        &self,
        source: &mut dyn RemoteSource,
    ) -> Result<TransferReport, IngestError> {
        let result = self.transfer_all(source);
        source.close();
        result
    }

    fn transfer_all(&self, source: &mut dyn RemoteSource) -> Result<TransferReport, IngestError> {
        fs::create_dir_all(&self.staging_dir).map_err(|e| {
            IngestError::Transfer(format!(
                "cannot create staging directory {}: {e}",
                self.staging_dir.display()
            ))
        })?;

        let entries = source.list(&self.remote_dir)?;
        log::info!("{} entries under {}", entries.len(), self.remote_dir);

        let mut report = TransferReport::default();
        for entry in entries {
            if entry.is_dir {
                log::debug!("skipping directory {}", entry.path);
                report.skipped_dirs += 1;
                continue;
            }
            if !is_plain_file_name(&entry.name) {
                log::warn!("skipping remote entry with unusable name {:?}", entry.name);
                report.failures.push(TransferFailure {
                    name: entry.name.clone(),
                    message: "unusable file name".into(),
                });
                continue;
            }

            match self.download(source, &entry) {
                Ok(staged) => {
                    log::info!(
                        "transferred {} ({} bytes, blake3 {})",
                        staged.name,
                        staged.size,
                        &staged.blake3[..16]
                    );
                    report.staged.push(staged);
                }
                Err(e) => {
                    log::error!("transfer failed for {}: {e}", entry.name);
                    report.failures.push(TransferFailure {
                        name: entry.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(partial) = report.partial_failure() {
            log::warn!("{partial}");
        }
        Ok(report)
    }

    fn download(
        &self,
        source: &mut dyn RemoteSource,
        entry: &RemoteEntry,
    ) -> Result<StagedFile, IngestError> {
        let local_path = self.staging_dir.join(&entry.name);
        let part_path = self.staging_dir.join(format!("{}.part", entry.name));

        let result = (|| -> Result<StagedFile, IngestError> {
            let file = fs::File::create(&part_path)?;
            let mut writer = HashingWriter::new(io::BufWriter::new(file));
            let size = source.fetch(&entry.path, &mut writer)?;
            let (mut inner, hash) = writer.finish();
            inner.flush()?;
            drop(inner);
            fs::rename(&part_path, &local_path)?;
            Ok(StagedFile {
                name: entry.name.clone(),
                local_path: local_path.clone(),
                size,
                blake3: hash,
            })
        })();

        if result.is_err() {
            let _ = fs::remove_file(&part_path);
        }
        result
    }
}

/// Leaf names only: no separators, no `.`/`..`.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Forwards writes while hashing them.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }

    fn finish(self) -> (W, String) {
        (self.inner, self.hasher.finalize().to_hex().to_string())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
