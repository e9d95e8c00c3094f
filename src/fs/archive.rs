//! Tar archive extraction
//!
//! Supports `.tar` and gzip-compressed `.tar.gz` / `.tgz`. Only directories
//! and regular files are materialized; links and special entries are
//! skipped. Entries whose path would land outside the destination abort
//! the extraction.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const TARGET: &str = "ops_toolkit::archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from the file name suffix
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Overrides suffix detection
    pub format: Option<ArchiveFormat>,
    /// Checked before each entry
    pub cancel: Option<CancellationToken>,
}

/// Archive errors
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported archive type: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid file path in archive: {0}")]
    InvalidPath(String),

    #[error("extraction cancelled")]
    Cancelled,
}

/// Extract `src` into `dst`, returning the number of files written
pub fn extract(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<usize, ArchiveError> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let format = options
        .format
        .or_else(|| ArchiveFormat::detect(src))
        .ok_or_else(|| ArchiveError::UnsupportedFormat(src.to_path_buf()))?;

    debug!(target: TARGET, src = %src.display(), dst = %dst.display(), ?format, "extracting archive");

    let file = File::open(src).map_err(|source| ArchiveError::Io {
        path: src.to_path_buf(),
        source,
    })?;

    fs::create_dir_all(dst).map_err(|source| ArchiveError::Io {
        path: dst.to_path_buf(),
        source,
    })?;

    match format {
        ArchiveFormat::Tar => unpack(Archive::new(file), src, dst, options.cancel.as_ref()),
        ArchiveFormat::TarGz => unpack(
            Archive::new(GzDecoder::new(file)),
            src,
            dst,
            options.cancel.as_ref(),
        ),
    }
}

fn unpack<R: Read>(
    mut archive: Archive<R>,
    src: &Path,
    dst: &Path,
    cancel: Option<&CancellationToken>,
) -> Result<usize, ArchiveError> {
    let read_err = |source| ArchiveError::Io {
        path: src.to_path_buf(),
        source,
    };

    let mut written = 0;
    for entry in archive.entries().map_err(read_err)? {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ArchiveError::Cancelled);
        }

        let mut entry = entry.map_err(read_err)?;
        let name = entry.path().map_err(read_err)?.into_owned();
        let rel = sanitize(&name)?;
        let target = dst.join(&rel);
        let mode = entry.header().mode().ok();
        let kind = entry.header().entry_type();

        let write_err = |source| ArchiveError::Io {
            path: target.clone(),
            source,
        };

        if kind.is_dir() {
            fs::create_dir_all(&target).map_err(write_err)?;
            set_mode(&target, mode).map_err(write_err)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
            let mut out = create_file(&target, mode).map_err(write_err)?;
            io::copy(&mut entry, &mut out).map_err(write_err)?;
            written += 1;
        } else {
            trace!(target: TARGET, path = %name.display(), ?kind, "skipping entry");
        }
    }

    debug!(target: TARGET, files = written, "archive extracted");
    Ok(written)
}

/// Normalize an entry path, rejecting anything that escapes the root
fn sanitize(name: &Path) -> Result<PathBuf, ArchiveError> {
    let invalid = || ArchiveError::InvalidPath(name.display().to_string());
    let mut clean = PathBuf::new();

    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(invalid());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }

    Ok(clean)
}

#[cfg(unix)]
fn create_file(path: &Path, mode: Option<u32>) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if let Some(mode) = mode {
        options.mode(mode & 0o7777);
    }
    let file = options.open(path)?;
    set_mode(path, mode)?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_file(path: &Path, _mode: Option<u32>) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    fn file_header(path: &str, size: usize, mode: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(size as u64);
        header.set_mode(mode);
        header.set_cksum();
        header
    }

    fn sample_tar() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut builder = Builder::new(&mut buf);

            let mut dir = Header::new_gnu();
            dir.set_path("pkg/").unwrap();
            dir.set_size(0);
            dir.set_mode(0o755);
            dir.set_entry_type(tar::EntryType::Directory);
            dir.set_cksum();
            builder.append(&dir, &[] as &[u8]).unwrap();

            let body = b"hello";
            builder
                .append(&file_header("pkg/hello.txt", body.len(), 0o644), &body[..])
                .unwrap();

            let script = b"#!/bin/sh\n";
            builder
                .append(&file_header("pkg/bin/run.sh", script.len(), 0o755), &script[..])
                .unwrap();

            let mut link = Header::new_gnu();
            link.set_path("pkg/link").unwrap();
            link.set_size(0);
            link.set_entry_type(tar::EntryType::Symlink);
            link.set_link_name("hello.txt").unwrap();
            link.set_cksum();
            builder.append(&link, &[] as &[u8]).unwrap();

            builder.finish().unwrap();
        }
        buf
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.zip")), None);
    }

    #[test]
    fn test_extract_tar() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bundle.tar");
        fs::write(&src, sample_tar()).unwrap();
        let dst = dir.path().join("out");

        let files = extract(&src, &dst, &ExtractOptions::default()).unwrap();

        assert_eq!(files, 2);
        assert_eq!(fs::read_to_string(dst.join("pkg/hello.txt")).unwrap(), "hello");
        assert!(dst.join("pkg/bin/run.sh").is_file());
        assert!(!dst.join("pkg/link").exists());
    }

    #[test]
    fn test_extract_tgz() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bundle.tgz");
        fs::write(&src, gzip(&sample_tar())).unwrap();
        let dst = dir.path().join("out");

        extract(&src, &dst, &ExtractOptions::default()).unwrap();

        assert_eq!(fs::read_to_string(dst.join("pkg/hello.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_explicit_format_overrides_suffix() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bundle.bin");
        fs::write(&src, gzip(&sample_tar())).unwrap();

        let options = ExtractOptions {
            format: Some(ArchiveFormat::TarGz),
            ..Default::default()
        };
        extract(&src, dir.path().join("out"), &options).unwrap();

        let err = extract(&src, dir.path().join("out2"), &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bundle.tar");
        fs::write(&src, sample_tar()).unwrap();
        let dst = dir.path().join("out");

        extract(&src, &dst, &ExtractOptions::default()).unwrap();

        let mode = fs::metadata(dst.join("pkg/bin/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let mut buf = Vec::new();
        {
            let mut builder = Builder::new(&mut buf);
            let body = b"pwned";
            let mut header = Header::new_old();
            let name = b"../evil.txt";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, &body[..]).unwrap();
            builder.finish().unwrap();
        }

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("evil.tar");
        fs::write(&src, buf).unwrap();
        let dst = dir.path().join("out");

        let err = extract(&src, &dst, &ExtractOptions::default()).unwrap_err();

        assert!(matches!(err, ArchiveError::InvalidPath(_)));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(Path::new("a/./b")).unwrap(), PathBuf::from("a/b"));
        assert_eq!(sanitize(Path::new("a/../b")).unwrap(), PathBuf::from("b"));
        assert!(sanitize(Path::new("/etc/passwd")).is_err());
        assert!(sanitize(Path::new("a/../../b")).is_err());
    }

    #[test]
    fn test_cancelled_before_first_entry() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bundle.tar");
        fs::write(&src, sample_tar()).unwrap();
        let dst = dir.path().join("out");

        let token = CancellationToken::new();
        token.cancel();
        let options = ExtractOptions {
            cancel: Some(token),
            ..Default::default()
        };

        let err = extract(&src, &dst, &options).unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
        assert!(!dst.join("pkg/hello.txt").exists());
    }
}
