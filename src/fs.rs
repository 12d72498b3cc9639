//! Contains the structs and traits that define a "filesystem" backend.
//!
//! A filesystem is everything behind one realm: metadata lookups, byte
//! streams, and namespace mutations. All operations are asynchronous
//! and return boxed futures, so that `DavFileSystem` stays object-safe.
use std::fmt::Debug;
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dyn_clone::DynClone;
use futures_util::future::BoxFuture;
use futures_util::stream::Stream;

macro_rules! notimplemented {
    ($method:expr) => {
        Box::pin(std::future::ready(Err(FsError::NotImplemented)))
    };
}

/// Errors generated by a filesystem implementation.
///
/// These are more result-codes than errors, really.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotImplemented,
    GeneralFailure,
    Exists,
    NotFound,
    Forbidden,
    InsufficientStorage,
    LoopDetected,
    PathTooLong,
    TooLarge,
    IsRemote,
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the DavFileSystem methods.
pub type FsFuture<'a, T> = BoxFuture<'a, FsResult<T>>;

/// Convenience alias for a boxed Stream.
pub type FsStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

use crate::davpath::DavPath;

/// The trait that defines a filesystem.
pub trait DavFileSystem: Debug + Sync + Send + DynClone {
    /// Open a file.
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>>;

    /// Perform read_dir.
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>>;

    /// Return the metadata of a file or directory.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// Return the metadata of a file, directory or symbolic link.
    ///
    /// Differs from metadata() in that if the path is a symbolic link,
    /// it returns the metadata for the link itself, not for the thing
    /// it points to.
    fn symlink_metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        self.metadata(path)
    }

    /// Create a directory.
    #[allow(unused_variables)]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("create_dir")
    }

    /// Remove a directory.
    ///
    /// Only works when the directory is empty.
    #[allow(unused_variables)]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove_dir")
    }

    /// Remove a file.
    #[allow(unused_variables)]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove_file")
    }

    /// Copy a single file, preserving the modification time where possible.
    ///
    /// There is deliberately no `rename`: MOVE is implemented as a
    /// per-resource copy followed by deletion of the source, so that
    /// partial failures can be reported per resource.
    #[allow(unused_variables)]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("copy")
    }
}

dyn_clone::clone_trait_object!(DavFileSystem);

/// One directory entry (or child node).
pub trait DavDirEntry: Debug + Send {
    /// name of the entry.
    fn name(&self) -> Vec<u8>;

    /// metadata of the entry.
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>>;
}

/// A DavFile is the equivalent of an open file handle.
pub trait DavFile: Debug + Send {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>>;
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()>;
    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes>;
    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64>;
    /// Flush pending writes to backing storage. This is the commit
    /// point of a PUT: it completes before locks are updated and
    /// before the response status goes out.
    fn flush(&mut self) -> FsFuture<'_, ()>;
}

/// Not much more than type, length, and some timestamps.
pub trait DavMetaData: Debug + Send + Sync + DynClone {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    /// Simplistic default implementation of etag()
    ///
    /// Returns "\<length\>-\<timestamp_in_ms\>" with the numbers in hex.
    /// Filesystems with stable file identities should override this.
    fn etag(&self) -> Option<String> {
        if let Ok(t) = self.modified() {
            if let Ok(t) = t.duration_since(UNIX_EPOCH) {
                return Some(format!(
                    "{:x}-{:x}",
                    self.len(),
                    t.as_secs() * 1_000_000 + t.subsec_nanos() as u64 / 1000
                ));
            }
        }
        Some(format!("{:x}", self.len()))
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    fn is_symlink(&self) -> bool {
        false
    }

    /// Last access time (default: notimplemented)
    fn accessed(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }

    /// Creation time (default: notimplemented)
    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }

    /// Inode change time (ctime) (default: notimplemented)
    fn status_changed(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
}

dyn_clone::clone_trait_object!(DavMetaData);

/// OpenOptions for open().
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// open for reading
    pub read: bool,
    /// open for writing
    pub write: bool,
    /// open in write-append mode
    pub append: bool,
    /// truncate file first when writing
    pub truncate: bool,
    /// create file if it doesn't exist
    pub create: bool,
    /// must create new file, fail if it already exists.
    pub create_new: bool,
}

impl OpenOptions {
    pub fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            ..OpenOptions::default()
        }
    }

    pub fn write() -> OpenOptions {
        OpenOptions {
            write: true,
            ..OpenOptions::default()
        }
    }
}

impl std::error::Error for FsError {}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
