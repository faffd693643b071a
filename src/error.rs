use thiserror::Error;

pub type InboxResult<T> = Result<T, InboxError>;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("push channel is not connected")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
