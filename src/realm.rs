//! Realm resolution: mapping URL prefixes to filesystem backends.
//!
//! A realm binds a URL prefix ("/pubshare") to a local storage root.
//! Prefixes are matched longest-first on whole path segments,
//! optionally case-insensitively. The matched prefix becomes the
//! hidden prefix of the request's [`DavPath`]; the tail is normalized
//! against the realm's filesystem.
//!
//! [`DavPath`]: ../davpath/struct.DavPath.html
use crate::DavError;
use crate::DavResult;
use crate::davpath::DavPath;
use crate::fs::DavFileSystem;
use http::StatusCode;

/// One URL prefix → filesystem binding.
#[derive(Debug, Clone)]
pub struct Realm {
    pub(crate) prefix: String,
    pub(crate) fs: Box<dyn DavFileSystem>,
}

impl Realm {
    /// The URL prefix of this realm, e.g. "/pubshare".
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// The set of realms a handler serves.
#[derive(Debug, Clone, Default)]
pub(crate) struct RealmTable {
    realms: Vec<Realm>,
    case_insensitive: bool,
}

impl RealmTable {
    pub fn add(&mut self, prefix: impl Into<String>, fs: Box<dyn DavFileSystem>) {
        let mut prefix = prefix.into();
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        if prefix == "/" {
            prefix.clear();
        }
        self.realms.push(Realm { prefix, fs });
        // longest prefix first, so the most specific realm wins.
        self.realms.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }

    pub fn set_case_insensitive(&mut self, ci: bool) {
        self.case_insensitive = ci;
    }

    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }

    // does `path` fall under `prefix`, on a segment boundary?
    fn matches(&self, path: &str, prefix: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }
        let (path_cmp, prefix_cmp);
        let (p1, p2);
        if self.case_insensitive {
            p1 = path.to_ascii_lowercase();
            p2 = prefix.to_ascii_lowercase();
            path_cmp = p1.as_str();
            prefix_cmp = p2.as_str();
        } else {
            path_cmp = path;
            prefix_cmp = prefix;
        }
        path_cmp == prefix_cmp
            || (path_cmp.starts_with(prefix_cmp)
                && path_cmp.as_bytes()[prefix_cmp.len()] == b'/')
    }

    /// Resolve a request path to (realm, path-with-prefix).
    ///
    /// The path is percent-decoded and normalized first; traversal
    /// outside the realm root has already been rejected by the
    /// normalization. An unmatched path is 404.
    pub fn resolve(&self, path: &str) -> DavResult<(&Realm, DavPath)> {
        let davpath = DavPath::new(path)?;
        let decoded = davpath.as_display_string();
        let decoded = decoded.trim_end_matches('/');
        let decoded = if decoded.is_empty() { "/" } else { decoded };
        for realm in &self.realms {
            if self.matches(decoded, &realm.prefix) {
                let mut davpath = davpath;
                // the prefix as it appears in the path (case may differ).
                let actual = &decoded[..realm.prefix.len()];
                davpath.set_prefix(actual)?;
                return Ok((realm, davpath));
            }
        }
        debug!("resolve: no realm matches {}", path);
        Err(DavError::Status(StatusCode::NOT_FOUND))
    }

    /// Resolve a Destination: header the same way the request path is
    /// resolved. The caller compares the realms.
    pub fn resolve_destination(&self, dest: &str) -> DavResult<(&Realm, DavPath)> {
        self.resolve(dest).map_err(|e| match e {
            // a destination outside any realm is a client error.
            DavError::Status(StatusCode::NOT_FOUND) => DavError::Status(StatusCode::BAD_REQUEST),
            e => e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localfs::LocalFs;

    fn table() -> RealmTable {
        let mut t = RealmTable::default();
        t.add("/pub", LocalFs::new("/tmp/pub", true));
        t.add("/pub/nested", LocalFs::new("/tmp/nested", true));
        t.add("/other", LocalFs::new("/tmp/other", true));
        t
    }

    #[test]
    fn longest_prefix_wins() {
        let t = table();
        let (realm, path) = t.resolve("/pub/nested/file.txt").unwrap();
        assert_eq!(realm.prefix(), "/pub/nested");
        assert_eq!(path.as_url_string(), "/file.txt");

        let (realm, _) = t.resolve("/pub/nestedX").unwrap();
        assert_eq!(realm.prefix(), "/pub");
    }

    #[test]
    fn segment_boundary_matching() {
        let t = table();
        // "/pubshare" does not live in "/pub".
        assert!(t.resolve("/pubshare/x").is_err());
        let (realm, _) = t.resolve("/pub").unwrap();
        assert_eq!(realm.prefix(), "/pub");
    }

    #[test]
    fn case_insensitive_option() {
        let mut t = table();
        assert!(t.resolve("/PUB/file").is_err());
        t.set_case_insensitive(true);
        let (realm, path) = t.resolve("/PUB/file").unwrap();
        assert_eq!(realm.prefix(), "/pub");
        // the display path keeps the case the client used.
        assert_eq!(path.as_url_string_with_prefix(), "/PUB/file");
    }

    #[test]
    fn traversal_is_rejected() {
        let t = table();
        assert!(t.resolve("/pub/../../etc/passwd").is_err());
    }

    #[test]
    fn dotdot_within_realm_is_normalized() {
        let t = table();
        let (_, path) = t.resolve("/pub/a/../b").unwrap();
        assert_eq!(path.as_url_string_with_prefix(), "/pub/b");
    }
}
