//! A WebDAV file-sharing server core, as a library.
//!
//! The entry point is [`DavHandler`]. It is built once from a [`DavConfig`],
//! and then handles `http::Request`s by dispatching them to per-method
//! handlers that work against pluggable backends:
//!
//! - one filesystem backend per *realm* (URL prefix), see [`fs`] and [`localfs`],
//! - a locksystem backend, see [`ls`] and [`memls`],
//! - a dead-property backend, see [`ps`] and [`memps`],
//! - an optional domain controller for Basic authentication, see [`auth`].
//!
//! The handler implements GET, HEAD, PUT, DELETE, OPTIONS and the WebDAV
//! extension methods PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK and
//! UNLOCK, and advertises compliance class `DAV: 1,2`.
//!
//! Example:
//!
//! ```rust,no_run
//! use dav_fileserver::{DavHandler, localfs::LocalFs, memls::MemLs, memps::MemPs};
//!
//! let dav = DavHandler::builder()
//!     .realm("/share", LocalFs::new("/srv/share", true))
//!     .locksystem(MemLs::new())
//!     .propsystem(MemPs::new())
//!     .build_handler();
//! ```
//!
//! [`DavHandler`]: struct.DavHandler.html
//! [`DavConfig`]: struct.DavConfig.html
#[macro_use]
extern crate log;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;
mod kvfile;
mod multierror;
mod ranges;
mod util;
mod xmltree_ext;

pub mod async_stream;
pub mod auth;
pub mod body;
pub mod davpath;
pub mod fs;
pub mod localfs;
pub mod ls;
pub mod memls;
pub mod memps;
pub mod ps;
pub mod realm;

pub use crate::davhandler::{DavConfig, DavHandler};
pub use crate::util::{DavMethod, DavMethodSet};

pub(crate) use crate::davhandler::DavInner;
pub(crate) use crate::errors::DavError;

type DavResult<T> = Result<T, DavError>;
