/// Error reported to a job's completion callback.
///
/// # Logging Convention
/// The Display implementation includes the underlying cause, so log it with `{:#}` to get the
/// full chain of the wrapped `anyhow` error:
/// ```ignore
/// tracing::error!("job failed: {:#}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("remote read failed: {0:#}")]
    RemoteReadFailed(anyhow::Error),

    #[error("local write failed: {0:#}")]
    LocalWriteFailed(anyhow::Error),

    #[error("job was cancelled")]
    Cancelled,

    #[error("retries exhausted, last error: {source}")]
    RetriesExhausted {
        #[source]
        source: Box<Error>,
    },

    #[error("engine shut down before the job finished")]
    Shutdown,
}

impl Error {
    /// The segment-level error that caused the job to fail, if any.
    #[must_use]
    pub fn last_error(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source } => source.last_error(),
            other => other,
        }
    }
}
