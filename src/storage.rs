use crate::error::ImportError;
use log::debug;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// 本地文件存储，所有路径相对于 root
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 相对路径转绝对路径，拒绝 `..` 与绝对路径
    pub fn path(&self, relative: impl AsRef<Path>) -> Result<PathBuf, ImportError> {
        let relative = relative.as_ref();
        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(ImportError::InvalidPath(
                        relative.to_string_lossy().to_string(),
                    ));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(ImportError::InvalidPath(
                relative.to_string_lossy().to_string(),
            ));
        }
        Ok(self.root.join(clean))
    }

    /// 外部进程给出的路径转为存储相对路径
    pub fn relative_path(&self, path: &str) -> Result<String, ImportError> {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            self.path(candidate)?;
            return Ok(path.trim_start_matches("./").to_string());
        }

        let mut roots = vec![self.root.clone()];
        if let Ok(canonical) = std::fs::canonicalize(&self.root) {
            roots.push(canonical);
        }
        for root in roots {
            if let Ok(stripped) = candidate.strip_prefix(&root) {
                self.path(stripped)?;
                return Ok(stripped.to_string_lossy().to_string());
            }
        }
        Err(ImportError::InvalidPath(path.to_string()))
    }

    pub async fn put(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<(), ImportError> {
        let path = self.path(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, contents).await?;
        debug!("[Storage] Wrote {} bytes to {:?}", contents.len(), path);
        Ok(())
    }

    pub async fn get(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>, ImportError> {
        Ok(fs::read(self.path(relative)?).await?)
    }

    pub async fn get_string(&self, relative: impl AsRef<Path>) -> Result<String, ImportError> {
        Ok(fs::read_to_string(self.path(relative)?).await?)
    }

    pub async fn exists(&self, relative: impl AsRef<Path>) -> Result<bool, ImportError> {
        let path = self.path(relative)?;
        Ok(fs::try_exists(&path).await? && fs::metadata(&path).await?.is_file())
    }

    pub async fn size(&self, relative: impl AsRef<Path>) -> Result<u64, ImportError> {
        Ok(fs::metadata(self.path(relative)?).await?.len())
    }

    /// 文件不存在时返回 false
    pub async fn delete(&self, relative: impl AsRef<Path>) -> Result<bool, ImportError> {
        let path = self.path(relative)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("[Storage] Removed {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
