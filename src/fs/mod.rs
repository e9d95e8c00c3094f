//! Filesystem helpers
//!
//! Thin wrappers that create parent directories, attach the offending path
//! to every error, and speak the serialization formats used across the
//! toolkit (JSON, TOML, YAML).

pub mod archive;

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use walkdir::WalkDir;

/// Filesystem errors
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("TOML parse error in {}: {source}", path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("TOML encode error for {}: {source}", path.display())]
    TomlEncode {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },

    #[error("YAML error in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("git repository root not found above {}", .0.display())]
    GitRootNotFound(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> FsError + '_ {
    move |source| FsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn create_parent(path: &Path) -> Result<(), FsError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_error(parent))
        }
        _ => Ok(()),
    }
}

pub fn read_text(path: impl AsRef<Path>) -> Result<String, FsError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(io_error(path))
}

/// Write `content`, creating parent directories
pub fn write_text(path: impl AsRef<Path>, content: &str) -> Result<(), FsError> {
    let path = path.as_ref();
    create_parent(path)?;
    fs::write(path, content).map_err(io_error(path))
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, FsError> {
    let path = path.as_ref();
    let content = read_text(path)?;
    serde_json::from_str(&content).map_err(|source| FsError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `data` as JSON indented with 4 spaces
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, data: &T) -> Result<(), FsError> {
    let path = path.as_ref();
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut serializer)
        .map_err(|source| FsError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    create_parent(path)?;
    fs::write(path, buf).map_err(io_error(path))
}

pub fn read_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, FsError> {
    let path = path.as_ref();
    let content = read_text(path)?;
    toml::from_str(&content).map_err(|source| FsError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_toml<T: Serialize + ?Sized>(path: impl AsRef<Path>, data: &T) -> Result<(), FsError> {
    let path = path.as_ref();
    let content = toml::to_string(data).map_err(|source| FsError::TomlEncode {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &content)
}

pub fn read_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, FsError> {
    let path = path.as_ref();
    let content = read_text(path)?;
    serde_yml::from_str(&content).map_err(|source| FsError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_yaml<T: Serialize + ?Sized>(path: impl AsRef<Path>, data: &T) -> Result<(), FsError> {
    let path = path.as_ref();
    let content = serde_yml::to_string(data).map_err(|source| FsError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &content)
}

/// Copy a file, creating parent directories of `dst`.
///
/// Permission bits are copied along with the contents.
pub fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<u64, FsError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    create_parent(dst)?;
    fs::copy(src, dst).map_err(io_error(src))
}

/// Move a file, falling back to copy + remove across filesystems
pub fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), FsError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    create_parent(dst)?;
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_file(src, dst)?;
    fs::remove_file(src).map_err(io_error(src))
}

/// Recursively copy `src` into `dst`
pub fn copy_dir(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), FsError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    fs::create_dir_all(dst).map_err(io_error(dst))?;

    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| entry.path());
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }

    Ok(())
}

pub fn move_dir(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(), FsError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    if !dst.exists() && fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_dir(src, dst)?;
    fs::remove_dir_all(src).map_err(io_error(src))
}

pub fn path_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

pub fn file_exists(path: impl AsRef<Path>) -> bool {
    fs::metadata(path).map(|m| !m.is_dir()).unwrap_or(false)
}

pub fn dir_exists(path: impl AsRef<Path>) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Nearest ancestor of the working directory containing `.git`
pub fn find_git_root() -> Result<PathBuf, FsError> {
    let cwd = std::env::current_dir().map_err(io_error(Path::new(".")))?;
    find_git_root_from(cwd)
}

pub fn find_git_root_from(start: impl AsRef<Path>) -> Result<PathBuf, FsError> {
    let start = start.as_ref();
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| FsError::GitRootNotFound(start.to_path_buf()))
}

/// Write `reader` to `path` through a temp file in the same directory.
///
/// Readers of `path` see either the old contents or the new ones.
pub fn atomic_write(path: impl AsRef<Path>, mut reader: impl Read) -> Result<(), FsError> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut temp = tempfile::Builder::new()
        .prefix(&format!("{name}.tmp."))
        .tempfile_in(dir)
        .map_err(io_error(dir))?;

    io::copy(&mut reader, &mut temp).map_err(io_error(temp.path()))?;
    temp.as_file_mut().flush().map_err(io_error(path))?;

    temp.persist(path).map_err(|e| FsError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
