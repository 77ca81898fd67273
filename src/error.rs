use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to fetch page {page} (token: {token}): {source}")]
    PageFetch {
        page: usize,
        token: String,
        #[source]
        source: Box<EtlError>,
    },

    #[error("CSV format error: {0}")]
    Csv(String),
}

impl EtlError {
    /// Wrap an error with the page index and token it was raised for.
    pub fn at_page(self, page: usize, token: Option<&str>) -> Self {
        EtlError::PageFetch {
            page,
            token: token.unwrap_or("<first page>").to_string(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
