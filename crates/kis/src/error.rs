use thiserror::Error;

/// Broker-protocol-level error. Every adapter operation that can fail
/// resolves into one of these before crossing into `router_core::RouterError`.
#[derive(Debug, Error)]
pub enum KisError {
    #[error("http transport error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("broker returned http status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("failed to deserialize broker response: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("broker rejected request: rt_cd={rt_cd} msg_cd={msg_cd} msg={msg}")]
    Api {
        rt_cd: String,
        msg_cd: String,
        msg: String,
    },

    #[error("token acquisition failed: {0}")]
    Token(String),

    #[error("no TR ID for the requested (class, session, virtual, action) tuple")]
    NoTrId,

    #[error("empty or unparsable response body: {0}")]
    EmptyResponse(String),
}
