mod add;
mod refresh;
mod search;
pub mod server;

use std::sync::Arc;

pub use add::*;
pub use refresh::*;
pub use search::*;
pub use server::*;

use crate::config::{ExtractorOptions, Opts, SearchOptions};
use crate::{SearchService, ThumbnailExtractor};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 使用内置的缩略图特征打开检索服务
pub fn open_service(
    opts: &Opts,
    extractor: &ExtractorOptions,
    search: SearchOptions,
) -> anyhow::Result<SearchService> {
    let extractor = Arc::new(ThumbnailExtractor::new(extractor.thumbnail_side));
    Ok(SearchService::open(&opts.conf_dir, extractor, search)?)
}
