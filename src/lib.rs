pub mod ai;
pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod filter;
pub mod logging;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod types;
