//! 图片特征提取
//!
//! 检索流程只依赖 [`FeatureExtractor`]，具体的模型由调用方注入。
//! 内置的 [`ThumbnailExtractor`] 使用缩略图像素作为特征，无需额外的模型文件。

use image::DynamicImage;
use image::imageops::FilterType;
use ndarray::Array1;

/// 特征提取器
///
/// 对于同一张图片，提取结果必须是确定的；输出维度在进程生命周期内保持不变。
pub trait FeatureExtractor: Send + Sync {
    /// 输出向量的维度
    fn dim(&self) -> usize;

    /// 从归一化后的图片中提取特征向量
    fn extract(&self, image: &DynamicImage) -> anyhow::Result<Array1<f32>>;
}

/// 缩略图特征：缩放到 side x side 的 RGB 图像，展平后归一化为单位向量
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailExtractor {
    side: u32,
}

impl ThumbnailExtractor {
    pub fn new(side: u32) -> Self {
        assert!(side > 0, "thumbnail side must be positive");
        Self { side }
    }
}

impl Default for ThumbnailExtractor {
    fn default() -> Self {
        Self::new(16)
    }
}

impl FeatureExtractor for ThumbnailExtractor {
    fn dim(&self) -> usize {
        (self.side * self.side * 3) as usize
    }

    fn extract(&self, image: &DynamicImage) -> anyhow::Result<Array1<f32>> {
        if image.width() == 0 || image.height() == 0 {
            anyhow::bail!("图片尺寸为空");
        }
        let thumb = image.resize_exact(self.side, self.side, FilterType::Triangle).to_rgb8();
        let mut feature = thumb.as_raw().iter().map(|&v| v as f32 / 255.0).collect::<Array1<f32>>();
        let norm = feature.dot(&feature).sqrt();
        if norm > 0.0 {
            feature /= norm;
        }
        Ok(feature)
    }
}
