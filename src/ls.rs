//! Contains the structs and traits that define a "locksystem" backend.
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use dyn_clone::DynClone;
use xmltree::Element;

use crate::davpath::DavPath;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Opaque token that identifies the lock ("opaquelocktoken:...").
    pub token: String,
    /// Root URL the lock was requested against.
    pub path: DavPath,
    /// Authenticated user that created the lock.
    pub principal: Option<String>,
    /// Client-supplied `<owner>` payload, stored opaquely.
    pub owner: Option<Element>,
    /// Absolute expiry time. `None` means "never".
    pub timeout_at: Option<SystemTime>,
    /// Requested timeout. `None` means `Infinite`.
    pub timeout: Option<Duration>,
    /// Shared or exclusive write lock.
    pub shared: bool,
    /// Depth: `true` is infinity, `false` is 0.
    pub deep: bool,
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Sync + Send + DynClone {
    /// Lock a node. Impossible if the node or any of its ancestors or
    /// (for deep locks) descendants is incompatibly locked.
    ///
    /// Returns `Ok(new_lock)` if succeeded, or `Err(conflicting_lock)`
    /// if failed.
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock>;

    /// Unlock a node: the token is fully released, together with all of
    /// its URL associations. Returns empty `Err` if the token does not
    /// cover the node (or has expired).
    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()>;

    /// Refresh the timeout of a lock. Returns the updated lock, or
    /// `Err` if the token is unknown or expired.
    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>)
    -> Result<DavLock, ()>;

    /// Check if the node is locked, and if so, whether every covering
    /// lock is matched by one of the submitted tokens (from the `If:`
    /// header). If not, the first conflicting lock is returned.
    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: Vec<&str>,
    ) -> Result<(), DavLock>;

    /// Find and return all live locks that cover a given path.
    fn discover(&self, path: &DavPath) -> Vec<DavLock>;

    /// Delete all lock associations at this path and below (after MOVE
    /// or DELETE). A lock that no longer covers any URL is released.
    fn delete(&self, path: &DavPath) -> Result<(), ()>;

    /// Implicit lock extension: a resource that was just created inside
    /// a collection held by a depth-infinity lock joins that lock.
    /// Called where PUT, MKCOL and COPY succeed.
    fn enroll(&self, path: &DavPath);
}

dyn_clone::clone_trait_object!(DavLockSystem);
