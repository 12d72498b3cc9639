//! Contains the structs and traits that define a dead-property backend.
//!
//! Dead properties are client-supplied metadata, keyed by
//! (display path, namespace, name), with opaque XML fragments as
//! values. Live DAV: properties are computed by the PROPFIND handler
//! and never reach this store.
use std::fmt::Debug;

use dyn_clone::DynClone;
use http::StatusCode;

use crate::davpath::DavPath;
use crate::fs::FsResult;

/// A webdav property.
#[derive(Debug, Clone)]
pub struct DavProp {
    pub name: String,
    pub prefix: Option<String>,
    /// Namespace URI. An empty namespace is stored as the empty string.
    pub namespace: Option<String>,
    /// Pre-serialized XML fragment, so that set-then-get is byte exact.
    pub xml: Option<Vec<u8>>,
}

/// The trait that defines a property store.
pub trait DavPropSystem: Debug + Sync + Send + DynClone {
    /// Does this path have any dead properties?
    fn have_props(&self, path: &DavPath) -> bool;

    /// Apply a batch of property updates. `true` entries are sets,
    /// `false` entries are removes. Returns the per-property status.
    fn patch_props(
        &self,
        path: &DavPath,
        patch: Vec<(bool, DavProp)>,
    ) -> FsResult<Vec<(StatusCode, DavProp)>>;

    /// List the dead properties of a path. `do_content` includes the
    /// stored values, otherwise just the names.
    fn get_props(&self, path: &DavPath, do_content: bool) -> FsResult<Vec<DavProp>>;

    /// Get one specific property. Returns the stored XML fragment.
    fn get_prop(&self, path: &DavPath, prop: DavProp) -> FsResult<Vec<u8>>;

    /// Remove every property of a path. Called when the resource is
    /// destroyed.
    fn remove_props(&self, path: &DavPath) -> FsResult<()>;

    /// Deep-copy the property mapping from one path to another.
    fn copy_props(&self, from: &DavPath, to: &DavPath) -> FsResult<()>;
}

dyn_clone::clone_trait_object!(DavPropSystem);
