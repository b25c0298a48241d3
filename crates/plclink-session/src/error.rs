/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] plclink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] plclink_frame::FrameError),

    /// The send interval is outside the accepted range.
    #[error("send interval {0} ms out of range (1..=10000)")]
    InvalidInterval(u64),

    /// A slot index does not exist in the frame.
    #[error("slot {slot} out of range (frame has {len} slots)")]
    InvalidSlot { slot: usize, len: usize },

    /// The slot is machine-managed and cannot be set by hand.
    #[error("slot {0} is reserved for the command code")]
    ReservedSlot(usize),

    /// A command name or code is not recognized.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The device link is gone.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
