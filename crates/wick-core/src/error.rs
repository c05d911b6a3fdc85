use thiserror::Error;

#[derive(Debug, Error)]
pub enum WickError {
    #[error("provide only one of private key, ticket or secret")]
    ConflictingCredentials,

    #[error("{0}")]
    AuthMismatch(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("unknown auth method '{0}': expected anonymous, ticket, wampcra or cryptosign")]
    UnknownAuthMethod(String),

    #[error("unknown serializer '{0}': expected json, msgpack or cbor")]
    UnknownSerializer(String),

    #[error("repeat count must be greater than zero")]
    InvalidRepeat,

    #[error("concurrency must be greater than zero")]
    InvalidConcurrency,

    #[error("unsupported transport for '{0}': expected ws, wss, tcp, tcps or local")]
    UnsupportedTransport(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to join realm '{realm}' at {url}: {reason}")]
    Connect {
        url: String,
        realm: String,
        reason: String,
    },

    /// An error reported by the router, identified by its error URI.
    #[error("{uri}: {message}")]
    Protocol { uri: String, message: String },

    #[error("session closed")]
    SessionClosed,

    #[error("no session available")]
    NoSession,

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("home directory not found: set HOME or WICK_CONFIG")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl WickError {
    pub fn protocol(uri: impl Into<String>, message: impl Into<String>) -> Self {
        WickError::Protocol {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// The router error URI, when this error came from the router.
    pub fn uri(&self) -> Option<&str> {
        match self {
            WickError::Protocol { uri, .. } => Some(uri),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WickError>;
