use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use image::DynamicImage;
use log::{debug, info};
use ndarray::Array1;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde::{Deserialize, Serialize};

use crate::config::ConfDir;
use crate::error::{Error, Result};
use crate::extractor::FeatureExtractor;
use crate::metrics;
use crate::model::{EmbeddingEntry, ImageId};
use crate::store::list_ids;
use crate::utils::{atomic_create, atomic_write};

/// 特征文件扩展名
pub const FEATURE_EXT: &str = "npy";

/// 特征缓存的元信息，在第一次写入特征时发布，之后不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FeatureMeta {
    dim: usize,
}

/// 特征缓存，每张图片对应一个 `<id>.npy` 文件
///
/// 缓存只增不删，是判断图片是否已经提取过特征的唯一依据。
/// 所有特征的维度相同，由 `feature.json` 记录。
#[derive(Debug, Clone)]
pub struct FeatureCache {
    dir: PathBuf,
    meta_path: PathBuf,
}

impl FeatureCache {
    /// 打开特征缓存，目录不存在时自动创建
    pub fn open(conf_dir: &ConfDir) -> Result<Self> {
        let dir = conf_dir.feature_dir();
        fs::create_dir_all(&dir).map_err(|e| Error::write(&dir, e))?;
        Ok(Self { dir, meta_path: conf_dir.feature_meta_path() })
    }

    /// 图库的特征维度，尚未缓存任何特征时返回 `None`
    pub fn dim(&self) -> Result<Option<usize>> {
        match self.read_meta()? {
            Some(dim) => Ok(Some(dim)),
            None => self.infer_dim(),
        }
    }

    pub fn path(&self, id: &ImageId) -> PathBuf {
        self.dir.join(id.file_name(FEATURE_EXT))
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.path(id).is_file()
    }

    /// 确保图片的特征已经缓存，返回本次是否新写入了特征
    ///
    /// 已缓存时不会调用特征提取器。
    pub fn ensure_cached(
        &self,
        id: &ImageId,
        image: &DynamicImage,
        extractor: &dyn FeatureExtractor,
    ) -> Result<bool> {
        self.ensure_with(id, Some(extractor.dim()), || {
            extractor.extract(image).map_err(|e| Error::Embedding(format!("{e:#}")))
        })
    }

    /// 与 [`Self::ensure_cached`] 相同，但特征由调用方提供
    ///
    /// `dim` 为期望的维度，写入前会检查向量的维度与数值。
    /// 并发调用时可能重复计算，但每次发布的都是完整的文件。
    pub fn ensure_with<F>(&self, id: &ImageId, dim: Option<usize>, compute: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Array1<f32>>,
    {
        if self.contains(id) {
            return Ok(false);
        }
        let vector = compute()?;
        validate(&vector, dim)?;
        self.check_dim(vector.len())?;

        let path = self.path(id);
        atomic_write(&path, |f| vector.write_npy(f).map_err(std::io::Error::other))
            .map_err(|e| Error::write(&path, e))?;
        metrics::inc_feature_written();
        debug!("缓存特征 {}", id);
        Ok(true)
    }

    /// 读取单个特征
    pub fn load(&self, id: &ImageId) -> Result<Array1<f32>> {
        let path = self.path(id);
        let file = File::open(&path).map_err(|e| Error::read(&path, e))?;
        Array1::<f32>::read_npy(BufReader::new(file))
            .map_err(|e| Error::Corrupted { path, reason: e.to_string() })
    }

    /// 读取全部特征，顺序不固定
    pub fn load_all(&self) -> Result<Vec<EmbeddingEntry>> {
        self.ids()?
            .into_iter()
            .map(|id| Ok(EmbeddingEntry { id, vector: self.load(&id)? }))
            .collect()
    }

    /// 所有已缓存特征的标识符
    pub fn ids(&self) -> Result<Vec<ImageId>> {
        list_ids(&self.dir, FEATURE_EXT)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.ids()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 检查向量维度与图库一致，图库还没有维度时以 `dim` 为准
    fn check_dim(&self, dim: usize) -> Result<()> {
        let expected = match self.read_meta()? {
            Some(expected) => expected,
            None => {
                let inferred = self.infer_dim()?.unwrap_or(dim);
                self.publish_meta(inferred)?
            }
        };
        if expected != dim {
            return Err(Error::Embedding(format!(
                "特征维度 {} 与图库的特征维度 {} 不一致",
                dim, expected
            )));
        }
        Ok(())
    }

    fn read_meta(&self) -> Result<Option<usize>> {
        let bytes = match fs::read(&self.meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::read(&self.meta_path, e)),
        };
        let meta: FeatureMeta = serde_json::from_slice(&bytes).map_err(|e| Error::Corrupted {
            path: self.meta_path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(meta.dim))
    }

    /// 没有元信息的旧图库，以任意一个已有特征的维度为准
    fn infer_dim(&self) -> Result<Option<usize>> {
        match self.ids()?.first() {
            Some(id) => Ok(Some(self.load(id)?.len())),
            None => Ok(None),
        }
    }

    /// 发布元信息，返回最终生效的维度
    fn publish_meta(&self, dim: usize) -> Result<usize> {
        let bytes = serde_json::to_vec(&FeatureMeta { dim })
            .map_err(|e| Error::write(&self.meta_path, io::Error::other(e)))?;
        match atomic_create(&self.meta_path, |f| f.write_all(&bytes)) {
            Ok(()) => {
                info!("图库特征维度为 {}", dim);
                Ok(dim)
            }
            // 并发的第一次写入，先发布者生效
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.read_meta()?.ok_or_else(|| Error::read(&self.meta_path, e))
            }
            Err(e) => Err(Error::write(&self.meta_path, e)),
        }
    }
}

/// 检查特征向量的维度与数值
pub(crate) fn validate(vector: &Array1<f32>, dim: Option<usize>) -> Result<()> {
    if let Some(dim) = dim {
        if vector.len() != dim {
            return Err(Error::Embedding(format!(
                "特征维度错误，期望 {}，实际 {}",
                dim,
                vector.len()
            )));
        }
    }
    if vector.is_empty() {
        return Err(Error::Embedding("特征向量为空".to_string()));
    }
    if !vector.iter().all(|v| v.is_finite()) {
        return Err(Error::Embedding("特征向量包含非有限值".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use image::RgbImage;
    use ndarray::array;
    use rstest::*;
    use tempfile::TempDir;

    use super::*;

    struct CountingExtractor(AtomicUsize);

    impl FeatureExtractor for CountingExtractor {
        fn dim(&self) -> usize {
            2
        }

        fn extract(&self, _: &DynamicImage) -> anyhow::Result<Array1<f32>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(array![0.25, -1.5])
        }
    }

    #[fixture]
    fn cache() -> (TempDir, FeatureCache) {
        let dir = TempDir::new().unwrap();
        let cache = FeatureCache::open(&ConfDir::new(dir.path())).unwrap();
        (dir, cache)
    }

    #[rstest]
    fn test_ensure_cached_idempotent(cache: (TempDir, FeatureCache)) {
        let (_dir, cache) = cache;
        let extractor = CountingExtractor(AtomicUsize::new(0));
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let id = ImageId::new();

        assert!(cache.ensure_cached(&id, &image, &extractor).unwrap());
        assert!(!cache.ensure_cached(&id, &image, &extractor).unwrap());
        assert_eq!(extractor.0.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[rstest]
    fn test_roundtrip_bit_identical(cache: (TempDir, FeatureCache)) {
        let (_dir, cache) = cache;
        let id = ImageId::new();
        let vector = array![0.1f32, 1.0 / 3.0, -7.0e-12, f32::MAX, f32::MIN_POSITIVE];
        cache.ensure_with(&id, None, || Ok(vector.clone())).unwrap();

        let entries = cache.load_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        let bits = |v: &Array1<f32>| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&entries[0].vector), bits(&vector));
    }

    #[rstest]
    #[case::wrong_dim(array![1.0, 2.0, 3.0])]
    #[case::nan(array![f32::NAN, 1.0])]
    #[case::infinite(array![f32::INFINITY, 1.0])]
    fn test_invalid_vector_not_written(cache: (TempDir, FeatureCache), #[case] v: Array1<f32>) {
        let (_dir, cache) = cache;
        let id = ImageId::new();
        let err = cache.ensure_with(&id, Some(2), || Ok(v)).unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(!cache.contains(&id));
    }

    #[rstest]
    fn test_failed_compute_not_written(cache: (TempDir, FeatureCache)) {
        let (_dir, cache) = cache;
        let id = ImageId::new();
        let r = cache.ensure_with(&id, None, || Err(Error::Embedding("boom".into())));
        assert!(r.is_err());
        assert!(cache.is_empty().unwrap());
    }

    #[rstest]
    fn test_load_all_skips_foreign_files(cache: (TempDir, FeatureCache)) {
        let (dir, cache) = cache;
        let feature_dir = ConfDir::new(dir.path()).feature_dir();
        fs::write(feature_dir.join(".partial.tmp"), b"garbage").unwrap();
        fs::write(feature_dir.join("readme.txt"), b"hello").unwrap();
        fs::write(feature_dir.join("not-an-id.npy"), b"hello").unwrap();
        cache.ensure_with(&ImageId::new(), None, || Ok(array![1.0])).unwrap();
        assert_eq!(cache.load_all().unwrap().len(), 1);
    }

    #[rstest]
    fn test_dimension_fixed_by_first_write(cache: (TempDir, FeatureCache)) {
        let (_dir, cache) = cache;
        assert_eq!(cache.dim().unwrap(), None);
        cache.ensure_with(&ImageId::new(), Some(2), || Ok(array![1.0, 2.0])).unwrap();
        assert_eq!(cache.dim().unwrap(), Some(2));

        let id = ImageId::new();
        let err = cache.ensure_with(&id, Some(3), || Ok(array![1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(!cache.contains(&id));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[rstest]
    fn test_dimension_inferred_without_meta(cache: (TempDir, FeatureCache)) {
        let (dir, cache) = cache;
        cache.ensure_with(&ImageId::new(), None, || Ok(array![1.0, 2.0])).unwrap();
        fs::remove_file(ConfDir::new(dir.path()).feature_meta_path()).unwrap();
        assert_eq!(cache.dim().unwrap(), Some(2));

        let err = cache.ensure_with(&ImageId::new(), None, || Ok(array![1.0])).unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[rstest]
    #[case(2)]
    #[case(8)]
    #[case(16)]
    fn test_same_id_concurrent_writers(cache: (TempDir, FeatureCache), #[case] writers: usize) {
        let (dir, cache) = cache;
        let id = ImageId::new();
        let vector = array![0.5f32, -0.25, 1.0 / 3.0];

        thread::scope(|s| {
            for _ in 0..writers {
                s.spawn(|| cache.ensure_with(&id, Some(3), || Ok(vector.clone())).unwrap());
            }
        });

        let bits = |v: &Array1<f32>| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&cache.load(&id).unwrap()), bits(&vector));
        // 只剩下一个完整的特征文件，没有残留的临时文件
        let files = fs::read_dir(ConfDir::new(dir.path()).feature_dir()).unwrap().count();
        assert_eq!(files, 1);
        assert_eq!(cache.dim().unwrap(), Some(3));
    }

    #[rstest]
    fn test_corrupted_file(cache: (TempDir, FeatureCache)) {
        let (_dir, cache) = cache;
        let id = ImageId::new();
        fs::write(cache.path(&id), b"\x93NUMPY broken").unwrap();
        assert!(matches!(cache.load_all().unwrap_err(), Error::Corrupted { .. }));
    }
}
