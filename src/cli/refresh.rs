use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_service};
use crate::config::{ExtractorOptions, Opts, SearchOptions};

#[derive(Parser, Debug, Clone)]
pub struct RefreshCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
}

impl SubCommandExtend for RefreshCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let service = open_service(opts, &self.extractor, SearchOptions::default())?;
        info!("扫描缺少特征的图片……");
        let report = block_in_place(|| service.refresh())?;
        info!(
            "补充完成：扫描 {} 张，成功 {} 张，失败 {} 张",
            report.scanned, report.embedded, report.failed
        );
        Ok(())
    }
}
