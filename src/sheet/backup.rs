//! 表格备份与轮转
//!
//! 运行前把请求表复制为 `<名称>_backup_<YYYYmmdd_HHMMSS><扩展名>`，只保留最新的 keep_last 份。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::sheet::SheetError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

pub struct BackupManager {
    dir: PathBuf,
    keep_last: usize,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, keep_last: usize) -> Self {
        Self {
            dir: dir.into(),
            keep_last: keep_last.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn backup_name(sheet: &Path, at: DateTime<Local>) -> String {
        let stem = sheet
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sheet".to_string());
        let ext = sheet
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        format!("{stem}_backup_{}{ext}", at.format("%Y%m%d_%H%M%S"))
    }

    /// 备份并轮转；返回新备份的路径
    pub fn create(&self, sheet: &Path) -> Result<PathBuf, SheetError> {
        self.create_at(sheet, Local::now())
    }

    pub fn create_at(&self, sheet: &Path, at: DateTime<Local>) -> Result<PathBuf, SheetError> {
        if !sheet.exists() {
            return Err(SheetError::NotFound(sheet.to_path_buf()));
        }
        fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(Self::backup_name(sheet, at));
        let size = fs::copy(sheet, &target)?;
        info!(backup = %target.display(), size, "sheet backed up");
        self.rotate()?;
        Ok(target)
    }

    /// 所有备份，最新的在前（修改时间相同按文件名倒序，文件名含时间戳）
    pub fn list(&self) -> Result<Vec<BackupEntry>, SheetError> {
        let pattern = self.dir.join("*_backup_*");
        let mut entries = Vec::new();
        for path in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| SheetError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?
            .flatten()
        {
            let meta = fs::metadata(&path)?;
            if meta.is_file() {
                entries.push(BackupEntry {
                    path,
                    modified: meta.modified()?,
                    size: meta.len(),
                });
            }
        }
        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
        Ok(entries)
    }

    /// 删除超出 keep_last 的旧备份
    pub fn rotate(&self) -> Result<usize, SheetError> {
        let mut removed = 0;
        for old in self.list()?.into_iter().skip(self.keep_last) {
            match fs::remove_file(&old.path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %old.path.display(), error = %e, "could not remove old backup"),
            }
        }
        if removed > 0 {
            info!(removed, keep = self.keep_last, "old backups removed");
        }
        Ok(removed)
    }

    pub fn restore(&self, backup: &Path, target: &Path) -> Result<(), SheetError> {
        if !backup.exists() {
            return Err(SheetError::NotFound(backup.to_path_buf()));
        }
        fs::copy(backup, target)?;
        info!(from = %backup.display(), to = %target.display(), "sheet restored");
        Ok(())
    }
}
