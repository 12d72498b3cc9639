//! Simple implementation of a DavFileSystem, basically
//! a 1:1 mapping of the tokio::fs interface.
use std::io::ErrorKind;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;

#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStrExt;
#[cfg(target_family = "unix")]
use std::os::unix::fs::MetadataExt;

use bytes::Bytes;
use futures_util::stream::Stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::fs::*;

/// Local filesystem backend, rooted at a base directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    basedir: PathBuf,
    public: bool,
}

#[derive(Debug, Clone)]
struct LocalFsMetaData(std::fs::Metadata);

#[derive(Debug)]
struct LocalFsFile(tokio::fs::File);

struct LocalFsReadDir(tokio::fs::ReadDir);

#[derive(Debug)]
struct LocalFsDirEntry {
    entry: tokio::fs::DirEntry,
    name: Vec<u8>,
}

impl LocalFs {
    /// Create a new LocalFs DavFileSystem, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will
    /// be publically readable (mode 644/755), otherwise they will be
    /// private (mode 600/700). Umask still overrides this.
    pub fn new<P: AsRef<Path>>(base: P, public: bool) -> Box<LocalFs> {
        Box::new(LocalFs {
            basedir: base.as_ref().to_path_buf(),
            public,
        })
    }

    fn fspath(&self, path: &DavPath) -> PathBuf {
        self.basedir.join(path.as_rel_ospath())
    }
}

impl DavFileSystem for LocalFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match tokio::fs::metadata(self.fspath(path)).await {
                Ok(meta) => Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn symlink_metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match tokio::fs::symlink_metadata(self.fspath(path)).await {
                Ok(meta) => Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            trace!("FS: read_dir {:?}", self.fspath(path));
            match tokio::fs::read_dir(self.fspath(path)).await {
                Ok(iterator) => {
                    Ok(Box::pin(LocalFsReadDir(iterator)) as FsStream<Box<dyn DavDirEntry>>)
                },
                Err(e) => Err(e.into()),
            }
        })
    }

    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            trace!("FS: open {:?}", self.fspath(path));
            let mut opts = tokio::fs::OpenOptions::new();
            opts.read(options.read)
                .write(options.write)
                .append(options.append)
                .truncate(options.truncate)
                .create(options.create)
                .create_new(options.create_new);
            #[cfg(target_family = "unix")]
            opts.mode(if self.public { 0o644 } else { 0o600 });
            match opts.open(self.fspath(path)).await {
                Ok(file) => Ok(Box::new(LocalFsFile(file)) as Box<dyn DavFile>),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            trace!("FS: create_dir {:?}", self.fspath(path));
            let mut builder = tokio::fs::DirBuilder::new();
            #[cfg(target_family = "unix")]
            builder.mode(if self.public { 0o755 } else { 0o700 });
            builder.create(self.fspath(path)).await.map_err(|e| e.into())
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            trace!("FS: remove_dir {:?}", self.fspath(path));
            tokio::fs::remove_dir(self.fspath(path)).await.map_err(|e| e.into())
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            trace!("FS: remove_file {:?}", self.fspath(path));
            tokio::fs::remove_file(self.fspath(path)).await.map_err(|e| e.into())
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (from, to) = (self.fspath(from), self.fspath(to));
            trace!("FS: copy {:?} {:?}", from, to);
            let meta = tokio::fs::metadata(&from).await.map_err(FsError::from)?;
            if let Err(e) = tokio::fs::copy(&from, &to).await {
                debug!("copy failed: {:?}", e);
                return Err(e.into());
            }
            if let Ok(mtime) = meta.modified() {
                set_mtime(&to, mtime);
            }
            Ok(())
        })
    }
}

// Preserve the modification time on copied files, like "cp -p".
#[cfg(target_family = "unix")]
fn set_mtime(path: &Path, mtime: SystemTime) {
    use std::time::UNIX_EPOCH;
    let Ok(d) = mtime.duration_since(UNIX_EPOCH) else {
        return;
    };
    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    let tv = libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    };
    let times = [tv, tv];
    unsafe {
        libc::utimes(cpath.as_ptr(), times.as_ptr());
    }
}

#[cfg(not(target_family = "unix"))]
fn set_mtime(_path: &Path, _mtime: SystemTime) {}

impl Stream for LocalFsReadDir {
    type Item = Box<dyn DavDirEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.0.poll_next_entry(cx) {
            Poll::Ready(Ok(Some(entry))) => {
                #[cfg(target_family = "unix")]
                let name = entry.file_name().as_bytes().to_vec();
                #[cfg(not(target_family = "unix"))]
                let name = entry.file_name().to_string_lossy().into_owned().into_bytes();
                Poll::Ready(Some(Box::new(LocalFsDirEntry { entry, name })))
            },
            Poll::Ready(Ok(None)) | Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl DavDirEntry for LocalFsDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.clone()
    }

    // NOTE: this behaves like symlink_metadata.
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match self.entry.metadata().await {
                Ok(meta) => Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>),
                Err(e) => Err(e.into()),
            }
        })
    }
}

impl DavFile for LocalFsFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let meta = self.0.metadata().await.map_err(FsError::from)?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            self.0.write_all(&buf).await.map_err(FsError::from)?;
            Ok(())
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let mut buf = vec![0u8; count];
            let n = self.0.read(&mut buf).await.map_err(FsError::from)?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move { self.0.seek(pos).await.map_err(|e| e.into()) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move { self.0.flush().await.map_err(|e| e.into()) })
    }
}

impl DavMetaData for LocalFsMetaData {
    fn len(&self) -> u64 {
        self.0.len()
    }

    fn modified(&self) -> FsResult<SystemTime> {
        self.0.modified().map_err(|e| e.into())
    }

    fn accessed(&self) -> FsResult<SystemTime> {
        self.0.accessed().map_err(|e| e.into())
    }

    fn created(&self) -> FsResult<SystemTime> {
        self.0.created().map_err(|e| e.into())
    }

    #[cfg(target_family = "unix")]
    fn status_changed(&self) -> FsResult<SystemTime> {
        use std::time::{Duration, UNIX_EPOCH};
        Ok(UNIX_EPOCH + Duration::new(self.0.ctime() as u64, 0))
    }

    fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    fn is_file(&self) -> bool {
        self.0.is_file()
    }

    fn is_symlink(&self) -> bool {
        self.0.file_type().is_symlink()
    }

    // inode-mtime-size: stable for unchanged content, identical
    // content on the same inode yields the identical tag.
    #[cfg(target_family = "unix")]
    fn etag(&self) -> Option<String> {
        use std::time::UNIX_EPOCH;
        let mtime = self
            .0
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() * 1_000_000 + d.subsec_nanos() as u64 / 1000)
            .unwrap_or(0);
        Some(format!("{:x}-{:x}-{:x}", self.0.ino(), mtime, self.0.len()))
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        if let Some(errno) = e.raw_os_error() {
            // specific errors.
            match errno {
                libc::EMLINK | libc::ENOSPC | libc::EDQUOT => return FsError::InsufficientStorage,
                libc::EFBIG => return FsError::TooLarge,
                libc::EACCES | libc::EPERM => return FsError::Forbidden,
                libc::ENOTEMPTY | libc::EEXIST => return FsError::Exists,
                libc::ELOOP => return FsError::LoopDetected,
                libc::ENAMETOOLONG => return FsError::PathTooLong,
                libc::ENOTDIR => return FsError::Forbidden,
                libc::EISDIR => return FsError::Forbidden,
                libc::EROFS => return FsError::Forbidden,
                libc::ENOENT => return FsError::NotFound,
                libc::ENOSYS => return FsError::NotImplemented,
                libc::EXDEV => return FsError::IsRemote,
                _ => {},
            }
        } else {
            // not an OS error - must be "not implemented"
            // (e.g. metadata().created() on systems without st_crtime)
            return FsError::NotImplemented;
        }
        // generic mappings for whatever is left.
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            _ => FsError::GeneralFailure,
        }
    }
}
