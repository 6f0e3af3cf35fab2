/// Failures a renewal run can hit.
///
/// Only [`RenewError::RemoteService`] is retried; every other kind stops the
/// run or is absorbed before it starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenewError {
    /// The service answered, but the block does not have the expected layout.
    #[error("malformed key block: {0}")]
    MalformedKeyBlock(String),

    /// The remote call itself failed (rate limit, bad serial, outage).
    #[error("{0}")]
    RemoteService(String),

    /// The shared retry budget ran out before the batch completed.
    #[error("retries exhausted: {last_error}")]
    RetryBudgetExhausted {
        /// Message of the failure that spent the last retry.
        last_error: String,
    },

    /// Positional task parameters could not be used.
    #[error("invalid invocation parameters: {0}")]
    InvalidInvocationParameters(String),

    /// The request payload could not be built.
    #[error("request encoding failed: {0}")]
    Encoding(String),

    /// The key store refused a read, insert or delete.
    #[error("key store error: {0}")]
    Store(String),

    /// Configuration (e.g. the service public key) is unusable.
    #[error("config error: {0}")]
    Config(String),
}

impl RenewError {
    /// Whether the orchestrator should spend retry budget and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenewError::RemoteService(_))
    }
}
