use thiserror::Error;

/// Opaque, stable-across-versions error codes surfaced by the RTP negotiator
/// and the resource graph. Kept as explicit discriminants because callers on
/// the other side of the worker RPC boundary match on the numeric code, not
/// the Rust type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u16)]
pub enum OrtcErrorCode {
    #[error("too-many-dynamic-payloads")]
    TooManyDynamicPayloads = 1,
    #[error("invalid-rtp-parameters")]
    InvalidRtpParameters = 2,
    #[error("invalid-profile-level-id")]
    InvalidProfileLevelId = 3,
    #[error("profile-level-id-mismatch")]
    ProfileLevelIdMismatch = 4,
    #[error("unsupported-codec")]
    UnsupportedCodec = 5,
    #[error("no-rtx-associated-codec")]
    NoRtxAssociatedCodec = 6,
    #[error("invalid-sctp-stream-parameters")]
    InvalidSctpStreamParameters = 7,
    #[error("unbalanced-refs")]
    UnbalancedRefs = 8,
    #[error("invalid-resource-configuration")]
    InvalidResourceConfiguration = 9,
    #[error("required-direct-transport")]
    RequiredDirectTransport = 10,
}

#[derive(Debug, Error)]
pub enum OrtcError {
    #[error("{code}: {message}")]
    Validation {
        code: OrtcErrorCode,
        message: String,
    },
}

impl OrtcError {
    pub fn new(code: OrtcErrorCode, message: impl Into<String>) -> Self {
        OrtcError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> OrtcErrorCode {
        match self {
            OrtcError::Validation { code, .. } => *code,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("resource-not-found: {0}")]
    NotFound(u32),
    #[error("resource-wrong-type: resource {0} is not one of the requested types")]
    WrongType(u32),
    #[error("unbalanced-refs: resource {0} refcount went negative")]
    UnbalancedRefs(u32),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker channel frame exceeded maximum length ({len} > {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("worker process exited before becoming ready")]
    ExitedBeforeReady,
    #[error("worker gone")]
    WorkerGone,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("worker gone")]
    WorkerGone,
    #[error("request timed out")]
    Timeout,
    #[error("worker returned an error: {0}")]
    WorkerReturnedError(String),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Ortc(#[from] OrtcError),
    #[error("worker protocol failure: unexpected producer type {0:?}")]
    UnexpectedProducerType(String),
    #[error("worker protocol failure: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no codec found suitable for export")]
    NoExportableCodec,
    #[error("post-processing failed: {0}")]
    PostProcessingFailed(String),
}

#[derive(Debug, Error)]
pub enum RccError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Ortc(#[from] OrtcError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}
