//! Error taxonomy for the engine. Every component returns `EngineError`
//! (or a crate-local alias of it); each variant carries the context a
//! log call site needs without re-parsing a message string.

/// The six error kinds the engine distinguishes, plus a catch-all for
/// anything a lower-level dependency raises that doesn't map cleanly
/// onto one of them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing required fields, malformed regex, unparseable TOML.
    /// Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Network, timeout, 5xx from a sink. Retried with backoff.
    #[error("transient commit error for sink {sink}: {source}")]
    TransientCommit {
        sink: String,
        #[source]
        source: anyhow::Error,
    },

    /// 4xx, or a schema mismatch not masked by skip-unknown-fields.
    /// Retried identically to `TransientCommit` at the BulkProcessor
    /// layer, but triggers dump-on-error where configured.
    #[error("permanent commit error for sink {sink}: {source}")]
    PermanentCommit {
        sink: String,
        #[source]
        source: anyhow::Error,
    },

    /// A table existence check or create-table call failed. Fails the
    /// whole Commit it was part of.
    #[error("table ensure error for table {table}: {source}")]
    TableEnsure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed id or data during TransformStage. The event is
    /// skipped, not forwarded; this variant exists for the log call
    /// site, not for propagation.
    #[error("transform error for namespace {namespace}: {reason}")]
    Transform { namespace: String, reason: String },

    /// Save/Load against the offset store failed. Propagated to the
    /// caller; the engine never retries offset writes automatically.
    #[error("offset store error ({op}) for resume name {resume_name}: {source}")]
    OffsetStore {
        op: &'static str,
        resume_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True for the commit-error kinds BulkProcessor retries with
    /// backoff. `TransientCommit` and `PermanentCommit` are retried
    /// identically — only dump-on-error distinguishes them. `TableEnsure`
    /// is included because a `SinkClient::commit` that fails to ensure
    /// its tables propagates that error straight out of `commit`, and
    /// §7 states it is "subject to the same retry policy" as the other
    /// commit-error kinds.
    pub fn is_retryable_commit_error(&self) -> bool {
        matches!(
            self,
            EngineError::TransientCommit { .. }
                | EngineError::PermanentCommit { .. }
                | EngineError::TableEnsure { .. }
        )
    }

    /// True when the error kind calls for a dump-on-error forensic
    /// file (permanent errors only — a transient network blip isn't
    /// worth dumping rows for).
    pub fn wants_dump_on_error(&self) -> bool {
        matches!(self, EngineError::PermanentCommit { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
