use std::io::{self, Write};
use std::path::Path;

use indicatif::ProgressStyle;
use tempfile::NamedTempFile;

/// 写入中的临时文件后缀，遍历目录时需要跳过
pub const TMP_SUFFIX: &str = ".tmp";

/// 原子写入文件：先写入同目录下的临时文件，再重命名到目标路径
///
/// 读者要么看不到该文件，要么看到完整的内容。
/// 多个写者竞争同一路径时，最后一次重命名生效。
pub fn atomic_write<F>(path: &Path, f: F) -> io::Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
{
    write_tmp(path, f)?.persist(path)?;
    Ok(())
}

/// 与 [`atomic_write`] 相同，但目标路径已存在时返回 `ErrorKind::AlreadyExists`
///
/// 多个写者竞争同一路径时，第一次发布生效。
pub fn atomic_create<F>(path: &Path, f: F) -> io::Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
{
    write_tmp(path, f)?.persist_noclobber(path)?;
    Ok(())
}

fn write_tmp<F>(path: &Path, f: F) -> io::Result<NamedTempFile>
where
    F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".").suffix(TMP_SUFFIX).tempfile_in(dir)?;
    f(&mut tmp)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// 是否为 `atomic_write` 产生的临时文件
pub fn is_tmp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(TMP_SUFFIX))
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
