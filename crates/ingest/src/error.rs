use std::fmt;

#[derive(Debug)]
pub enum IngestError {
    /// Remote listing or connection failed. Fatal for the run.
    Transfer(String),
    /// Some individual downloads failed; the rest of the batch went through.
    PartialTransfer { failed: usize, total: usize },
    /// No decoder is registered for the file extension.
    UnsupportedFormat { extension: String, supported: Vec<&'static str> },
    /// A decoder accepted the file but could not read it.
    Load { path: String, message: String },
    /// Record lacks its business-key field (or the value is empty).
    MissingKey { entity: String, field: String, row: usize },
    /// A field value could not be converted to the entity's typed attribute.
    InvalidField { entity: String, field: String, message: String },
    /// Two source columns normalize to the same canonical name.
    DuplicateColumn { entity: String, column: String },
    /// The store rejected a read or write.
    Persistence(String),
    /// TOML parse / validation error.
    Config(String),
    /// Another run holds the run lock.
    Locked { path: String, holder: String },
    /// Upstream HTTP API failure.
    Upstream(String),
    /// Local filesystem error.
    Io(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer(msg) => write!(f, "transfer failed: {msg}"),
            Self::PartialTransfer { failed, total } => {
                write!(f, "{failed} of {total} file transfer(s) failed")
            }
            Self::UnsupportedFormat { extension, supported } => {
                let ext = if extension.is_empty() { "(none)" } else { extension.as_str() };
                write!(
                    f,
                    "unsupported file extension: {ext}. Supported extensions are: {}",
                    supported.join(", ")
                )
            }
            Self::Load { path, message } => write!(f, "cannot read {path}: {message}"),
            Self::MissingKey { entity, field, row } => {
                write!(f, "{entity} row {row}: missing business key '{field}'")
            }
            Self::InvalidField { entity, field, message } => {
                write!(f, "{entity}.{field}: {message}")
            }
            Self::DuplicateColumn { entity, column } => {
                write!(f, "{entity}: more than one source column normalizes to '{column}'")
            }
            Self::Persistence(msg) => write!(f, "persistence error: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Locked { path, holder } => {
                write!(f, "another run holds the lock {path} ({holder})")
            }
            Self::Upstream(msg) => write!(f, "upstream error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl IngestError {
    /// Fatal errors abort the whole run; everything else is scoped to a file,
    /// sheet or record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transfer(_) | Self::Config(_) | Self::Locked { .. } | Self::Upstream(_)
        )
    }
}
