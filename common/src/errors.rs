// Error handling framework
// Every error carries a classification so the retry machinery knows whether
// replaying the step can help.

use thiserror::Error;

/// How the retry machinery should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot succeed (bad config, 4xx, integrity violation).
    Terminal,
    /// Transient condition (network, 5xx, subprocess hiccup).
    Retryable,
    /// The run was cancelled; neither retried nor reported as failure.
    Cancelled,
}

/// Classification of an error into terminal / retryable / cancelled.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::Terminal
    }
}

/// Configuration and job-definition errors; always terminal.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job config: {0}")]
    InvalidConfig(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl Classify for ValidationError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Terminal
    }
}

/// Errors raised while acquiring data from a backup source.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Source returned HTTP {status}: {detail}")]
    HttpStatus { status: u16, detail: String },

    #[error("Request to source failed: {0}")]
    Request(String),

    #[error("Connection to source failed: {0}")]
    Connect(String),

    #[error("Source authentication failed: {0}")]
    Auth(String),

    #[error("{program} exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn {program}: {detail}")]
    CommandSpawn { program: String, detail: String },

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("Source object not found: {0}")]
    NotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Config(#[from] ValidationError),

    #[error("Acquisition cancelled")]
    Cancelled,
}

impl Classify for AcquireError {
    fn class(&self) -> ErrorClass {
        match self {
            AcquireError::Config(_) | AcquireError::Auth(_) | AcquireError::NotFound(_) => {
                ErrorClass::Terminal
            }
            AcquireError::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Retryable,
        }
    }
}

impl From<std::io::Error> for AcquireError {
    fn from(err: std::io::Error) -> Self {
        AcquireError::Io(err.to_string())
    }
}

/// Errors from the compress / encrypt stages.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Authentication tag mismatch")]
    TagMismatch,

    #[error("Artifact integrity violation: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Classify for TransformError {
    fn class(&self) -> ErrorClass {
        match self {
            TransformError::InvalidKey(_)
            | TransformError::TagMismatch
            | TransformError::Integrity(_) => ErrorClass::Terminal,
            TransformError::Io(_) => ErrorClass::Retryable,
        }
    }
}

impl From<std::io::Error> for TransformError {
    fn from(err: std::io::Error) -> Self {
        TransformError::Io(err.to_string())
    }
}

/// Errors from the backup-service API (request / upload-grant / confirm).
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("Backup service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request to backup service failed: {0}")]
    Request(String),

    #[error("Failed to decode backup service response: {0}")]
    Decode(String),
}

impl Classify for ControlPlaneError {
    fn class(&self) -> ErrorClass {
        match self {
            ControlPlaneError::Status { status, .. } if (400..500).contains(status) => {
                ErrorClass::Terminal
            }
            _ => ErrorClass::Retryable,
        }
    }
}

/// Errors from the presigned-URL uploader.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload grant expired at {0}")]
    GrantExpired(chrono::DateTime<chrono::Utc>),

    #[error("Upload target returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upload request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Classify for UploadError {
    fn class(&self) -> ErrorClass {
        match self {
            // Recovered at the pipeline level with a fresh grant, never retried as-is.
            UploadError::GrantExpired(_) => ErrorClass::Terminal,
            UploadError::Status { status, .. } if (400..500).contains(status) => {
                ErrorClass::Terminal
            }
            _ => ErrorClass::Retryable,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Io(err.to_string())
    }
}

/// Token acquisition errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Identity provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Token request failed: {0}")]
    Request(String),

    #[error("Failed to decode token response: {0}")]
    Decode(String),
}

impl Classify for AuthError {
    fn class(&self) -> ErrorClass {
        match self {
            AuthError::Status { status, .. } if (400..500).contains(status) => ErrorClass::Terminal,
            _ => ErrorClass::Retryable,
        }
    }
}

/// Hub discovery errors.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Hub endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Hub request failed: {0}")]
    Request(String),

    #[error("Failed to decode hub config: {0}")]
    Decode(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Work-queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connect(String),

    #[error("Failed to create stream: {0}")]
    Stream(String),

    #[error("Failed to create consumer: {0}")]
    Consumer(String),

    #[error("Failed to consume message: {0}")]
    Consume(String),

    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    #[error("Message deserialization failed: {0}")]
    Decode(String),
}

/// Top-level pipeline error; wraps the failing step's error and keeps its
/// classification.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Run cancelled")]
    Cancelled,
}

impl Classify for PipelineError {
    fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Validation(e) => e.class(),
            PipelineError::Acquire(e) => e.class(),
            PipelineError::Transform(e) => e.class(),
            PipelineError::ControlPlane(e) => e.class(),
            PipelineError::Upload(e) => e.class(),
            PipelineError::Auth(e) => e.class(),
            PipelineError::Cancelled => ErrorClass::Cancelled,
        }
    }
}
