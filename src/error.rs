use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Authenticated as {actual}, but the rule is for {expected}")]
    AuthMismatch { expected: String, actual: String },

    #[error("OAuth error: {0}")]
    Auth(String),

    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gmail error: {method} failed ({status}): {message}")]
    Api {
        method: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited. Try again later.")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Failed to fetch {message_id}: {reason}")]
    Fetch { message_id: String, reason: String },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("Malformed message {message_id}: {reason}")]
    MalformedMessage { message_id: String, reason: String },

    #[error("Failed to send {message_id}: {reason}")]
    Send { message_id: String, reason: String },

    #[error("Cycle aborted during {stage}: {source}")]
    Cycle {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn cycle(stage: &'static str, source: Error) -> Self {
        Self::Cycle {
            stage,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
