use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid relay url `{0}`")]
    InvalidUrl(String),
}
