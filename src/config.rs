use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "imsim", "imsim").expect("failed to get project dir");
    ConfDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 缩略图特征的边长，特征维度为 边长 x 边长 x 3
    #[arg(long, value_name = "SIDE", default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..=256))]
    pub thumbnail_side: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的排序结果数量
    #[arg(short, value_name = "K", default_value_t = 30)]
    pub k: usize,
    /// 精简结果中保留的数量
    #[arg(long, value_name = "COUNT", default_value_t = 3)]
    pub summary: usize,
    /// 相似度索引的刷新策略
    #[arg(long, value_enum, default_value_t = SnapshotPolicy::Rescan)]
    pub snapshot: SnapshotPolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { k: 30, summary: 3, snapshot: SnapshotPolicy::Rescan }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imsim", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imsim 数据目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加目录中的图片到图库
    Add(AddCommand),
    /// 从图库中搜索相似图片，查询图片同样会加入图库
    Search(SearchCommand),
    /// 为缺少特征的图片补充计算特征
    Refresh(RefreshCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回原始图片目录
    pub fn original_dir(&self) -> PathBuf {
        self.path.join("original")
    }

    /// 返回归一化图片目录
    pub fn resized_dir(&self) -> PathBuf {
        self.path.join("resized")
    }

    /// 返回特征缓存目录
    pub fn feature_dir(&self) -> PathBuf {
        self.path.join("feature")
    }

    /// 返回特征元信息文件，记录图库的特征维度
    pub fn feature_meta_path(&self) -> PathBuf {
        self.path.join("feature.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// 每次查询前重新扫描特征目录
    Rescan,
    /// 复用内存中的索引，仅在本进程写入新特征后重建
    Invalidate,
}
