use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ImageId;

/// 检索流程中可能出现的错误
#[derive(Error, Debug)]
pub enum Error {
    /// 图片或特征写入磁盘失败
    #[error("写入 {path} 失败: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 读取或遍历存储目录失败
    #[error("读取 {path} 失败: {source}")]
    StorageRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 缓存文件无法解析为合法的特征向量
    #[error("特征文件 {path} 已损坏: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// 缓存中某个特征的维度与其他特征不一致
    #[error("特征 {id} 的维度为 {actual}，与其他特征的 {expected} 不一致")]
    DimensionMismatch { id: ImageId, expected: usize, actual: usize },

    /// 上传的数据无法解码为图片
    #[error("无法解码图片: {0}")]
    InvalidImage(String),

    /// 特征提取器失败，或者输出了不合法的向量
    #[error("特征提取失败: {0}")]
    Embedding(String),
}

impl Error {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageWrite { path: path.into(), source }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageRead { path: path.into(), source }
    }

    /// 是否由客户端提交的数据引起
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_) | Self::Embedding(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
