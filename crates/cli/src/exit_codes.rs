//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `rawsync` exit codes.
//! Schedulers and wrapper scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                                   |
//! |---------|------------|-----------------------------------------------|
//! | 0       | Universal  | Success (per-file / per-record issues logged) |
//! | 1       | Universal  | General error (unspecified)                   |
//! | 2       | Universal  | CLI usage error (bad args)                    |
//! | 3-9     | local      | Config, run lock, store                       |
//! | 10-19   | transfer   | Remote file server                            |
//! | 20-29   | sites      | Upstream sites API                            |
//!
//! Partial failures (a file that would not load, a record without its key,
//! a download that failed mid-batch) never change the exit status. Read the
//! summary or the log.

use rawsync_ingest::IngestError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - the run completed, possibly with logged per-file failures.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments. clap exits with this code itself.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Local (3-9)
// =============================================================================

/// Config file unreadable, unparsable or invalid; required setting missing.
pub const EXIT_CONFIG: u8 = 3;

/// Another run holds the run lock.
pub const EXIT_LOCKED: u8 = 4;

/// The database could not be opened.
pub const EXIT_STORE: u8 = 5;

/// Local filesystem error (staging directory, lock file).
pub const EXIT_IO: u8 = 6;

// =============================================================================
// Transfer (10-19)
// =============================================================================

/// SFTP connection, host-key check, authentication or listing failed.
pub const EXIT_TRANSFER: u8 = 10;

// =============================================================================
// Sites (20-29)
// =============================================================================

/// Sites API unreachable, rejected the request, or sent an unusable reply.
pub const EXIT_UPSTREAM: u8 = 20;

/// Map a fatal pipeline error to its exit code.
pub fn ingest_exit_code(err: &IngestError) -> u8 {
    match err {
        IngestError::Config(_) => EXIT_CONFIG,
        IngestError::Locked { .. } => EXIT_LOCKED,
        IngestError::Persistence(_) => EXIT_STORE,
        IngestError::Io(_) => EXIT_IO,
        IngestError::Transfer(_) => EXIT_TRANSFER,
        IngestError::Upstream(_) => EXIT_UPSTREAM,
        _ => EXIT_ERROR,
    }
}
