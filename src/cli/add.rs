use std::fs;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::info;
use rayon::prelude::*;
use regex::Regex;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::cli::{SubCommandExtend, open_service};
use crate::config::{ExtractorOptions, Opts, SearchOptions};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp,gif")]
    pub suffix: String,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let re_suf = format!("(?i)^({})$", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf)?;

        let service = open_service(opts, &self.extractor, SearchOptions::default())?;

        let files = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().is_some_and(|s| re_suf.is_match(&s.to_string_lossy()))
            })
            .collect::<Vec<_>>();

        let pb = ProgressBar::new(files.len() as u64).with_style(pb_style());

        let failed = block_in_place(|| {
            files
                .par_iter()
                .progress_with(pb.clone())
                .filter(|path| {
                    let result = fs::read(path)
                        .map_err(anyhow::Error::from)
                        .and_then(|bytes| Ok(service.ingest(&bytes)?));
                    match result {
                        Ok(record) => {
                            pb.set_message(format!("{} -> {}", path.display(), record.id));
                            false
                        }
                        Err(e) => {
                            pb.println(format!("[ERR] {}: {}", path.display(), e));
                            true
                        }
                    }
                })
                .count()
        });

        pb.finish_with_message("图片添加完成");
        info!("添加 {} 张图片，失败 {} 张", files.len() - failed, failed);

        Ok(())
    }
}
