use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 图片标识符，入库时随机生成，与图片内容无关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 以该标识符命名的文件名
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0.hyphenated(), extension)
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// 已保存的图片记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: ImageId,
    /// 原始分辨率图片路径
    pub original: PathBuf,
    /// 归一化尺寸图片路径
    pub resized: PathBuf,
}

/// 一条缓存的特征
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEntry {
    pub id: ImageId,
    pub vector: Array1<f32>,
}
