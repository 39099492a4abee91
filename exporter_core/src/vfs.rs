use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use zip::read::ZipArchive;

use crate::logging;

// The drop guard only ever unlinks a directory with this leaf name.
pub const MOUNT_DIR_NAME: &str = "vfs_mount_point";

const ARCHIVE_EXTENSION: &str = "pk3";
const TEXTURE_EXTENSIONS: [&str; 4] = ["tga", "jpg", "jpeg", "png"];

#[derive(Debug)]
pub enum VfsError {
    Io(std::io::Error),
    BasePathNotDir(PathBuf),
    NoArchives,
    Zip {
        archive: PathBuf,
        error: zip::result::ZipError,
    },
    UnsafePath(String),
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::Io(err) => write!(f, "io error: {}", err),
            VfsError::BasePathNotDir(path) => {
                write!(f, "base path is not a directory: {}", path.display())
            }
            VfsError::NoArchives => write!(f, "no pk3 archives to mount"),
            VfsError::Zip { archive, error } => {
                write!(f, "archive {} failed: {}", archive.display(), error)
            }
            VfsError::UnsafePath(name) => write!(f, "archive entry path is unsafe: {}", name),
        }
    }
}

impl std::error::Error for VfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VfsError::Io(err) => Some(err),
            VfsError::Zip { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        VfsError::Io(err)
    }
}

/// Lists the pk3 archives directly under `base_path`, sorted by path byte
/// order. Non-regular files and other suffixes are skipped.
pub fn list_archives(base_path: &Path) -> Result<Vec<PathBuf>, VfsError> {
    if !base_path.is_dir() {
        return Err(VfsError::BasePathNotDir(base_path.to_path_buf()));
    }
    let mut archives = Vec::new();
    for entry in fs::read_dir(base_path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension() == Some(OsStr::new(ARCHIVE_EXTENSION)) {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// A mount tree expanded from a sorted pk3 list. Later archives in the list
/// take priority; the tree is removed when the handle drops.
#[derive(Debug)]
pub struct Vfs {
    mount_point: PathBuf,
}

impl Vfs {
    /// Expands every archive into `<parent>/vfs_mount_point`.
    ///
    /// Archives are extracted in reverse order and existing files are never
    /// overwritten, which together yield the usual Quake 3 priority: the
    /// last archive of the sorted list wins a name collision.
    pub fn mount(archives: &[PathBuf], parent: &Path) -> Result<Vfs, VfsError> {
        if archives.is_empty() {
            return Err(VfsError::NoArchives);
        }
        let mount_point = parent.join(MOUNT_DIR_NAME);
        if mount_point.exists() {
            fs::remove_dir_all(&mount_point)?;
        }
        fs::create_dir_all(&mount_point)?;

        let vfs = Vfs { mount_point };
        for archive in archives.iter().rev() {
            vfs.extract_archive(archive)?;
        }
        Ok(vfs)
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Joins a forward-slash virtual path onto the mount point. Relative
    /// segments are ignored so a resolved path cannot leave the tree.
    pub fn resolve(&self, virtual_path: &str) -> PathBuf {
        let normalized = virtual_path.replace('\\', "/");
        let mut out = self.mount_point.clone();
        for segment in normalized.split('/') {
            if !segment.is_empty() && segment != "." && segment != ".." {
                out.push(segment);
            }
        }
        out
    }

    /// Probes for a texture file: the path as given, then with each of the
    /// known image extensions substituted in order.
    pub fn find_texture(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        for ext in TEXTURE_EXTENSIONS {
            let candidate = path.with_extension(ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn extract_archive(&self, archive_path: &Path) -> Result<(), VfsError> {
        let file = fs::File::open(archive_path)?;
        let mut archive = ZipArchive::new(file).map_err(|error| VfsError::Zip {
            archive: archive_path.to_path_buf(),
            error,
        })?;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|error| VfsError::Zip {
                archive: archive_path.to_path_buf(),
                error,
            })?;
            let name = entry.name().replace('\\', "/");
            let trimmed = name.trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }

            let out_path = match safe_join(&self.mount_point, trimmed) {
                Ok(path) => path,
                Err(err) => {
                    logging::warn(format!("{}: {}", archive_path.display(), err));
                    continue;
                }
            };

            if entry.is_dir() || name.ends_with('/') {
                fs::create_dir_all(&out_path)?;
                continue;
            }
            if out_path.exists() {
                // A higher-priority archive already provided this path.
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            fs::write(&out_path, bytes)?;
        }
        Ok(())
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        if self.mount_point.file_name() != Some(OsStr::new(MOUNT_DIR_NAME)) {
            logging::error(format!(
                "refusing to remove mount tree not named {}: {}",
                MOUNT_DIR_NAME,
                self.mount_point.display()
            ));
            return;
        }
        if self.mount_point.exists() {
            if let Err(err) = fs::remove_dir_all(&self.mount_point) {
                logging::warn(format!(
                    "failed to remove mount tree {}: {}",
                    self.mount_point.display(),
                    err
                ));
            }
        }
    }
}

fn safe_join(base: &Path, entry: &str) -> Result<PathBuf, VfsError> {
    let rel = Path::new(entry);
    let mut safe = PathBuf::from(base);
    for component in rel.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            Component::CurDir => {}
            _ => return Err(VfsError::UnsafePath(entry.to_string())),
        }
    }

    if safe.file_name() == Some(OsStr::new("")) {
        return Err(VfsError::UnsafePath(entry.to_string()));
    }

    Ok(safe)
}
