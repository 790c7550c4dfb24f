use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NklError {
    #[error("missing config file pareto-nkl.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("object store request failed: {0}")]
    StoreHttp(String),

    #[error("object store returned status {status}: {message}")]
    StoreStatus { status: u16, message: String },

    #[error("upstream inventory request failed: {0}")]
    UpstreamHttp(String),

    #[error("upstream inventory returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("upstream inventory payload is not a row array: {0}")]
    UpstreamPayload(String),

    #[error("spreadsheet error: {0}")]
    Sheet(String),

    #[error("invalid user id (expected 10 digits): {0}")]
    InvalidUserId(String),

    #[error("invalid store code: {0}")]
    InvalidStoreCode(String),

    #[error("wrong user id or password")]
    InvalidCredentials,

    #[error("password and confirmation do not match")]
    PasswordMismatch,

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("credential database unavailable, try again")]
    CredentialsUnavailable,

    #[error("wrong admin password")]
    AdminDenied,

    #[error("remark required for {} minus item(s): {}", items.len(), items.join(", "))]
    #[diagnostic(help("every negative-value (NK) item needs a non-empty remark"))]
    MissingRemarks { items: Vec<String> },

    #[error("store not found in master: {0}")]
    UnknownStore(String),

    #[error("item {item} is not a minus item of store {store}")]
    UnknownItem { store: String, item: String },

    #[error("master dataset is not configured yet")]
    MasterNotConfigured,

    #[error("master sheet is missing required column {0}")]
    MalformedMaster(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
