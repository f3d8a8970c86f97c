#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("failed to start worker: {0}")]
    StartError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("worker is dead")]
    WorkerDead,

    #[error("pool is closed")]
    PoolClosed,

    #[error("operation cancelled")]
    Cancelled,
}

impl From<sbx_launch::LaunchError> for HostError {
    fn from(e: sbx_launch::LaunchError) -> Self {
        HostError::StartError(e.to_string())
    }
}

impl From<sbx_proto::DecodeError> for HostError {
    fn from(e: sbx_proto::DecodeError) -> Self {
        HostError::ProtocolError(e.to_string())
    }
}
