pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index;
mod metrics;
pub mod model;
mod server;
pub mod service;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use extractor::{FeatureExtractor, ThumbnailExtractor};
pub use service::SearchService;
