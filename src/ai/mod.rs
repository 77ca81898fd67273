//! Per-row enrichment through a generative model.

pub mod classifier;
pub mod error;
pub mod gemini;
pub mod prompt;
pub mod rate_limiter;

pub use classifier::{AiClassifier, AiSelection, ClassifierStats, RowCap, RowState};
pub use error::AiError;
pub use gemini::{GeminiClient, GenerativeModelPort};
pub use prompt::PromptTemplate;
pub use rate_limiter::{FixedDelay, RateLimiterPort, TokenBucket};
