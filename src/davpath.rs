//! Utility module to handle the path part of an URL as a filesystem path.
use std::error::Error;
use std::ffi::OsStr;
#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use percent_encoding as pct;

use crate::DavError;

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// URL path, percent-decoded and normalized, with a hidden realm prefix.
///
/// The prefix is the part of the URL path that selected the realm; the
/// tail after the prefix maps onto the realm's filesystem.
#[derive(Clone)]
pub struct DavPath {
    fullpath: Vec<u8>,
    pfxlen: usize,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_display_string())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (pfx, tail) = self.fullpath.split_at(self.pfxlen);
        write!(
            f,
            "{}[{}]",
            String::from_utf8_lossy(pfx),
            String::from_utf8_lossy(tail)
        )
    }
}

/// Error returned by some of the DavPath methods.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

// a decoded segment can contain any value except '/' or '\0'
fn valid_segment(src: &[u8]) -> Result<(), ParseError> {
    let mut p = pct::percent_decode(src);
    if p.any(|x| x == 0 || x == b'/') {
        return Err(ParseError::InvalidPath);
    }
    Ok(())
}

// encode path segment with user-defined ENCODE_SET
fn encode_path(src: &[u8]) -> Vec<u8> {
    pct::percent_encode(src, PATH_ENCODE_SET).to_string().into_bytes()
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes, fail on invalid encodings.
// - do not allow NUL or '/' in segments.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    // must consist of printable ASCII
    if rp.iter().any(|&x| !(32..=126).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    // must start with "/"
    if rawpath.is_empty() || rawpath[0] != b'/' {
        return Err(ParseError::InvalidPath);
    }

    // split up in segments
    let isdir = matches!(rawpath.last(), Some(b'/'));
    let mut v: Vec<&[u8]> = Vec::new();
    for segment in rawpath.split(|c| *c == b'/') {
        match segment {
            b"." | b"" => {},
            b".." => {
                if v.len() < 2 {
                    return Err(ParseError::ForbiddenPath);
                }
                v.pop();
                v.pop();
            },
            s => {
                valid_segment(s)?;
                v.push(b"/");
                v.push(s);
            },
        }
    }
    if isdir || v.is_empty() {
        v.push(b"/");
    }
    Ok(v.iter().flat_map(|s| pct::percent_decode(s)).collect())
}

/// Comparison ignores any trailing slash, so /foo == /foo/
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        let mut a = self.fullpath.as_slice();
        if a.len() > 1 && a.ends_with(b"/") {
            a = &a[..a.len() - 1];
        }
        let mut b = rhs.fullpath.as_slice();
        if b.len() > 1 && b.ends_with(b"/") {
            b = &b[..b.len() - 1];
        }
        a == b
    }
}

impl DavPath {
    /// from URL encoded path
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        Ok(DavPath {
            fullpath: path,
            pfxlen: 0,
        })
    }

    /// from URL encoded path and non-encoded prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let mut davpath = DavPath::new(src)?;
        davpath.set_prefix(prefix)?;
        Ok(davpath)
    }

    /// from request.uri
    pub(crate) fn from_uri(uri: &http::uri::Uri) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                fullpath: b"*".to_vec(),
                pfxlen: 0,
            }),
            path if path.starts_with('/') => DavPath::new(path),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// Mark the leading `prefix` of the path as the realm prefix.
    pub(crate) fn set_prefix(&mut self, prefix: &str) -> Result<(), ParseError> {
        let path = &mut self.fullpath;
        let prefix = prefix.as_bytes();
        if !path.starts_with(prefix) {
            return Err(ParseError::PrefixMismatch);
        }
        let mut pfxlen = prefix.len();
        if prefix.ends_with(b"/") {
            pfxlen -= 1;
            if path[pfxlen] != b'/' {
                return Err(ParseError::PrefixMismatch);
            }
        } else if path.len() == pfxlen {
            path.push(b'/');
        }
        self.pfxlen = pfxlen;
        Ok(())
    }

    /// return the realm prefix.
    pub fn prefix(&self) -> &str {
        std::str::from_utf8(&self.fullpath[..self.pfxlen]).unwrap_or("")
    }

    // the path tail after the prefix.
    fn tail(&self) -> &[u8] {
        &self.fullpath[self.pfxlen..]
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.fullpath.ends_with(b"/")
    }

    // is this a "star" request (only used with OPTIONS)
    pub(crate) fn is_star(&self) -> bool {
        self.fullpath == b"*"
    }

    /// add a slash to the end of the path (if not already present).
    pub(crate) fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    // add a slash, conditionally.
    pub(crate) fn add_slash_if(&mut self, b: bool) {
        if b && !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    /// Add a segment to the end of the path.
    pub(crate) fn push_segment(&mut self, b: &[u8]) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
        self.fullpath.extend_from_slice(b);
    }

    /// Return the parent collection.
    pub fn parent(&self) -> DavPath {
        let mut segs = self
            .fullpath
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .collect::<Vec<&[u8]>>();
        segs.pop();
        if !segs.is_empty() {
            segs.push(b"");
        }
        segs.insert(0, b"");
        let fullpath = segs.join(&b'/').to_vec();
        // the parent of the realm root lies outside the realm.
        let pfxlen = if fullpath.len() > self.pfxlen { self.pfxlen } else { 0 };
        DavPath { pfxlen, fullpath }
    }

    /// as percent-encoded URL string, without realm prefix.
    pub fn as_url_string(&self) -> String {
        let p = encode_path(self.tail());
        String::from_utf8(p).unwrap()
    }

    /// as percent-encoded URL string, with realm prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let p = encode_path(&self.fullpath);
        String::from_utf8(p).unwrap()
    }

    /// as decoded canonical path with realm prefix.
    ///
    /// This is the "display path" that keys the lock and property stores.
    pub fn as_display_string(&self) -> String {
        String::from_utf8_lossy(&self.fullpath).to_string()
    }

    /// as OS specific Path, relative (no leading slash), without prefix.
    ///
    /// Used to `push()` onto the realm's base directory.
    pub fn as_rel_ospath(&self) -> &Path {
        let spath = self.tail();
        let mut path = if !spath.is_empty() { &spath[1..] } else { spath };
        if path.ends_with(b"/") {
            path = &path[..path.len() - 1];
        }
        #[cfg(target_family = "unix")]
        let os_string = OsStr::from_bytes(path);
        #[cfg(not(target_family = "unix"))]
        let os_string: &OsStr = std::str::from_utf8(path).unwrap_or("").as_ref();
        Path::new(os_string)
    }

    /// The filename is the last segment of the path. Can be empty.
    pub(crate) fn file_name_bytes(&self) -> &[u8] {
        self.fullpath
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .next_back()
            .unwrap_or(b"")
    }

    /// Content-Type guessed from the filename extension.
    pub(crate) fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name_bytes();
        let d = name.rsplitn(2, |&c| c == b'.').collect::<Vec<&[u8]>>();
        if d.len() > 1 {
            if let Ok(ext) = std::str::from_utf8(d[0]) {
                if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                    return t;
                }
            }
        }
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_normalization() {
        let p = DavPath::new("/a//b/./c/%64").unwrap();
        assert_eq!(p.as_display_string(), "/a/b/c/d");
        let p = DavPath::new("/a/b/../c/").unwrap();
        assert_eq!(p.as_display_string(), "/a/c/");
        assert!(p.is_collection());
    }

    #[test]
    fn path_traversal_rejected() {
        assert!(DavPath::new("/../etc/passwd").is_err());
        assert!(DavPath::new("/a/../../etc").is_err());
        assert!(DavPath::new("relative/path").is_err());
    }

    #[test]
    fn prefix_split() {
        let p = DavPath::from_str_and_prefix("/share/dir/file.txt", "/share").unwrap();
        assert_eq!(p.prefix(), "/share");
        assert_eq!(p.as_url_string(), "/dir/file.txt");
        assert_eq!(p.as_url_string_with_prefix(), "/share/dir/file.txt");
        assert_eq!(p.as_rel_ospath(), Path::new("dir/file.txt"));
    }

    #[test]
    fn parent_keeps_prefix() {
        let p = DavPath::from_str_and_prefix("/share/dir/file.txt", "/share").unwrap();
        let parent = p.parent();
        assert_eq!(parent.as_display_string(), "/share/dir/");
        assert_eq!(parent.prefix(), "/share");
    }

    #[test]
    fn mime_guess_fallback() {
        let p = DavPath::new("/a/file.unknownext").unwrap();
        assert_eq!(p.get_mime_type_str(), "application/octet-stream");
        let p = DavPath::new("/a/file.txt").unwrap();
        assert_eq!(p.get_mime_type_str(), "text/plain");
    }
}
