use thiserror::Error;

// ---

/// Every failure a link can report.
///
/// One cause may resolve many completions at once, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    // ---
    /// A settlement was requested for a message that cannot be settled.
    /// Returned synchronously; never enters the state machine.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The adapter failed to create the underlying link.
    #[error("attach failed: {0}")]
    Attach(String),

    /// The owning connection reported an error.
    #[error("connection error: {0}")]
    Connection(String),

    /// An attached handle reported an error or was detached by the peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The adapter rejected one specific settle or send call.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Pending work was discarded by a caller-initiated detach.
    #[error("link was detached")]
    Detached,

    /// The link actor has shut down (facade dropped).
    #[error("link closed")]
    Closed,
}

// ---

pub type Result<T> = std::result::Result<T, LinkError>;
