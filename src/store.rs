use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use log::{debug, warn};

use crate::config::ConfDir;
use crate::error::{Error, Result};
use crate::model::{ImageId, ImageRecord};
use crate::utils::{atomic_write, is_tmp_file};

/// 归一化图片的边长
pub const RESIZED_SIDE: u32 = 256;
/// 图片保存格式的扩展名
pub const IMAGE_EXT: &str = "jpg";

/// 刚刚保存的图片，附带归一化后的像素，避免重新解码
pub struct StoredImage {
    pub record: ImageRecord,
    pub resized: DynamicImage,
    /// 上传图片的原始宽高
    pub original_size: (u32, u32),
}

/// 图片存储，原图与归一化图片分别保存在两个目录中，以标识符命名
#[derive(Debug, Clone)]
pub struct ImageStore {
    original_dir: PathBuf,
    resized_dir: PathBuf,
}

impl ImageStore {
    /// 打开图片存储，目录不存在时自动创建
    pub fn open(conf_dir: &ConfDir) -> Result<Self> {
        let original_dir = conf_dir.original_dir();
        let resized_dir = conf_dir.resized_dir();
        for dir in [&original_dir, &resized_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::write(dir, e))?;
        }
        Ok(Self { original_dir, resized_dir })
    }

    pub fn original_path(&self, id: &ImageId) -> PathBuf {
        self.original_dir.join(id.file_name(IMAGE_EXT))
    }

    pub fn resized_path(&self, id: &ImageId) -> PathBuf {
        self.resized_dir.join(id.file_name(IMAGE_EXT))
    }

    /// 保存上传的图片，返回新分配的标识符
    ///
    /// 两份文件要么都写入成功，要么都不存在。
    pub fn store(&self, bytes: &[u8]) -> Result<StoredImage> {
        let original = decode(bytes)?;
        let resized = original.resize_exact(RESIZED_SIDE, RESIZED_SIDE, FilterType::CatmullRom);

        let id = ImageId::new();
        let original_path = self.original_path(&id);
        let resized_path = self.resized_path(&id);

        write_jpeg(&original_path, &original)?;
        if let Err(e) = write_jpeg(&resized_path, &resized) {
            if let Err(e) = fs::remove_file(&original_path) {
                warn!("清理原图 {} 失败: {}", original_path.display(), e);
            }
            return Err(e);
        }
        debug!("保存图片 {}", id);

        Ok(StoredImage {
            record: ImageRecord { id, original: original_path, resized: resized_path },
            resized,
            original_size: (original.width(), original.height()),
        })
    }

    /// 重新读取已保存的归一化图片
    pub fn load_resized(&self, id: &ImageId) -> Result<DynamicImage> {
        let path = self.resized_path(id);
        let bytes = fs::read(&path).map_err(|e| Error::read(&path, e))?;
        decode(&bytes)
    }

    /// 列出所有已保存归一化图片的标识符，顺序不固定
    pub fn list_resized(&self) -> Result<Vec<ImageId>> {
        list_ids(&self.resized_dir, IMAGE_EXT)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::InvalidImage(e.to_string()))?;
    let img = reader.decode().map_err(|e| Error::InvalidImage(e.to_string()))?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

fn write_jpeg(path: &Path, img: &DynamicImage) -> Result<()> {
    let mut buf = Cursor::new(vec![]);
    img.write_to(&mut buf, ImageFormat::Jpeg)
        .map_err(|e| Error::write(path, io::Error::other(e)))?;
    atomic_write(path, |f| f.write_all(buf.get_ref())).map_err(|e| Error::write(path, e))
}

/// 列出目录中以标识符命名、扩展名为 `ext` 的文件
pub(crate) fn list_ids(dir: &Path, ext: &str) -> Result<Vec<ImageId>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::read(dir, e))?;
    let mut ids = vec![];
    for entry in entries {
        let path = entry.map_err(|e| Error::read(dir, e))?.path();
        if is_tmp_file(&path) || path.extension().and_then(|s| s.to_str()) != Some(ext) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match stem.parse() {
            Ok(id) => ids.push(id),
            Err(_) => warn!("跳过无法识别的文件: {}", path.display()),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut buf = Cursor::new(vec![]);
        DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn store() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(&ConfDir::new(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_writes_both_copies() {
        let (_dir, store) = store();
        let stored = store.store(&png(320, 200)).unwrap();
        assert!(stored.record.original.exists());
        assert!(stored.record.resized.exists());
        assert_eq!((stored.resized.width(), stored.resized.height()), (256, 256));
        assert_eq!(stored.original_size, (320, 200));

        let original = image::open(&stored.record.original).unwrap();
        assert_eq!((original.width(), original.height()), (320, 200));
        let resized = store.load_resized(&stored.record.id).unwrap();
        assert_eq!((resized.width(), resized.height()), (256, 256));
    }

    #[test]
    fn test_same_bytes_distinct_ids() {
        let (_dir, store) = store();
        let bytes = png(64, 64);
        let a = store.store(&bytes).unwrap();
        let b = store.store(&bytes).unwrap();
        assert_ne!(a.record.id, b.record.id);
        assert_eq!(store.list_resized().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_image_writes_nothing() {
        let (_dir, store) = store();
        let err = store.store(b"definitely not an image").err().unwrap();
        assert!(matches!(err, Error::InvalidImage(_)));
        assert!(store.list_resized().unwrap().is_empty());
    }

    #[test]
    fn test_resized_failure_removes_original() {
        let (dir, store) = store();
        let conf = ConfDir::new(dir.path());
        fs::remove_dir(conf.resized_dir()).unwrap();
        fs::write(conf.resized_dir(), b"").unwrap();

        let err = store.store(&png(64, 64)).err().unwrap();
        assert!(matches!(err, Error::StorageWrite { .. }));
        assert_eq!(fs::read_dir(conf.original_dir()).unwrap().count(), 0);
    }
}
