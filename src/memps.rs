//! In-memory dead-property store with optional file persistence.
//!
//! Properties are kept as display-path → ("namespace;name" → XML
//! fragment) maps. Mutators serialize through one writer lock, readers
//! clone what they need. Like [`MemLs`], a `MemPs` is a cheap handle.
//!
//! [`MemLs`]: ../memls/struct.MemLs.html
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::fs::FsResult;
use crate::kvfile::KvFile;
use crate::ps::*;

/// Property store backed by a string-keyed hash table, optionally
/// persisted to a key/value file.
#[derive(Debug, Clone)]
pub struct MemPs(Arc<MemPsImpl>);

#[derive(Debug)]
struct MemPsImpl {
    inner: Mutex<MemPsInner>,
    store: Option<KvFile>,
}

#[derive(Debug, Default)]
struct MemPsInner {
    loaded: bool,
    props: HashMap<String, HashMap<String, Vec<u8>>>,
}

const STORE_PREFIX: &str = "PROPS:";

impl MemPs {
    /// Create a new ephemeral "memps" property store.
    pub fn new() -> Box<MemPs> {
        Box::new(MemPs(Arc::new(MemPsImpl {
            inner: Mutex::new(MemPsInner {
                loaded: true,
                ..MemPsInner::default()
            }),
            store: None,
        })))
    }

    /// Create a property store persisted in the key/value file at `path`.
    pub fn persistent<P: AsRef<Path>>(path: P) -> Box<MemPs> {
        Box::new(MemPs(Arc::new(MemPsImpl {
            inner: Mutex::new(MemPsInner::default()),
            store: Some(KvFile::new(path)),
        })))
    }
}

fn norm_url(path: &DavPath) -> String {
    let mut s = path.as_display_string();
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

// properties are keyed by "namespace;name" within a resource.
fn prop_key(prop: &DavProp) -> String {
    let ns = prop.namespace.as_deref().unwrap_or("");
    format!("{};{}", ns, prop.name)
}

fn key_to_prop(key: &str, xml: Option<Vec<u8>>) -> DavProp {
    let (ns, name) = key.split_once(';').unwrap_or(("", key));
    DavProp {
        name: name.to_string(),
        prefix: None,
        namespace: if ns.is_empty() { Some(String::new()) } else { Some(ns.to_string()) },
        xml,
    }
}

impl DavPropSystem for MemPs {
    fn have_props(&self, path: &DavPath) -> bool {
        let inner = &mut *self.0.lock_inner();
        inner
            .props
            .get(&norm_url(path))
            .map(|m| !m.is_empty())
            .unwrap_or(false)
    }

    fn patch_props(
        &self,
        path: &DavPath,
        patch: Vec<(bool, DavProp)>,
    ) -> FsResult<Vec<(StatusCode, DavProp)>> {
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);
        let mut ret = Vec::new();
        for (set, prop) in patch {
            let key = prop_key(&prop);
            if set {
                let map = inner.props.entry(url.clone()).or_default();
                map.insert(key, prop.xml.clone().unwrap_or_default());
            } else if let Some(map) = inner.props.get_mut(&url) {
                map.remove(&key);
                if map.is_empty() {
                    inner.props.remove(&url);
                }
            }
            ret.push((StatusCode::OK, strip_content(prop)));
        }
        self.0.save(inner);
        Ok(ret)
    }

    fn get_props(&self, path: &DavPath, do_content: bool) -> FsResult<Vec<DavProp>> {
        let inner = &mut *self.0.lock_inner();
        let mut ret = Vec::new();
        if let Some(map) = inner.props.get(&norm_url(path)) {
            for (key, xml) in map {
                let xml = if do_content { Some(xml.clone()) } else { None };
                ret.push(key_to_prop(key, xml));
            }
        }
        Ok(ret)
    }

    fn get_prop(&self, path: &DavPath, prop: DavProp) -> FsResult<Vec<u8>> {
        let inner = &mut *self.0.lock_inner();
        inner
            .props
            .get(&norm_url(path))
            .and_then(|map| map.get(&prop_key(&prop)))
            .cloned()
            .ok_or(crate::fs::FsError::NotFound)
    }

    fn remove_props(&self, path: &DavPath) -> FsResult<()> {
        let inner = &mut *self.0.lock_inner();
        inner.props.remove(&norm_url(path));
        self.0.save(inner);
        Ok(())
    }

    fn copy_props(&self, from: &DavPath, to: &DavPath) -> FsResult<()> {
        let inner = &mut *self.0.lock_inner();
        if let Some(map) = inner.props.get(&norm_url(from)).cloned() {
            inner.props.insert(norm_url(to), map);
            self.0.save(inner);
        }
        Ok(())
    }
}

fn strip_content(mut prop: DavProp) -> DavProp {
    prop.xml = None;
    prop
}

impl MemPsImpl {
    // Take the writer lock, loading the persistent store on first use.
    fn lock_inner(&self) -> parking_lot::MutexGuard<'_, MemPsInner> {
        let mut inner = self.inner.lock();
        if !inner.loaded {
            if let Some(ref store) = self.store {
                match store.load() {
                    Ok(map) => {
                        for (key, value) in map {
                            let Some(url) = key.strip_prefix(STORE_PREFIX) else {
                                continue;
                            };
                            let Ok(props) =
                                serde_json::from_str::<HashMap<String, String>>(&value)
                            else {
                                continue;
                            };
                            inner.props.insert(
                                url.to_string(),
                                props.into_iter().map(|(k, v)| (k, v.into_bytes())).collect(),
                            );
                        }
                    },
                    Err(e) => error!("memps: cannot load property store: {}", e),
                }
            }
            inner.loaded = true;
        }
        inner
    }

    fn save(&self, inner: &MemPsInner) {
        let Some(ref store) = self.store else {
            return;
        };
        let mut map = HashMap::new();
        for (url, props) in &inner.props {
            let props = props
                .iter()
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).to_string()))
                .collect::<HashMap<_, _>>();
            map.insert(
                format!("{}{}", STORE_PREFIX, url),
                serde_json::to_string(&props).unwrap_or_default(),
            );
        }
        if let Err(e) = store.save(&map) {
            error!("memps: cannot save property store: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn prop(ns: &str, name: &str, xml: Option<&str>) -> DavProp {
        DavProp {
            name: name.to_string(),
            prefix: None,
            namespace: Some(ns.to_string()),
            xml: xml.map(|x| x.as_bytes().to_vec()),
        }
    }

    #[test]
    fn set_get_byte_exact() {
        let ps = MemPs::new();
        let xml = r#"<a:color xmlns:a="urn:x">mauve</a:color>"#;
        ps.patch_props(&p("/f"), vec![(true, prop("urn:x", "color", Some(xml)))])
            .unwrap();
        let got = ps.get_prop(&p("/f"), prop("urn:x", "color", None)).unwrap();
        assert_eq!(got, xml.as_bytes());
    }

    #[test]
    fn empty_namespace_is_permitted() {
        let ps = MemPs::new();
        let mut pr = prop("", "bare", Some("<bare>x</bare>"));
        pr.namespace = None;
        ps.patch_props(&p("/f"), vec![(true, pr)]).unwrap();
        let got = ps.get_props(&p("/f"), false).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].namespace.as_deref(), Some(""));
    }

    #[test]
    fn remove_all_on_delete() {
        let ps = MemPs::new();
        ps.patch_props(&p("/gone"), vec![(true, prop("urn:x", "a", Some("<a/>")))])
            .unwrap();
        assert!(ps.have_props(&p("/gone")));
        ps.remove_props(&p("/gone")).unwrap();
        assert!(!ps.have_props(&p("/gone")));
        assert!(ps.get_prop(&p("/gone"), prop("urn:x", "a", None)).is_err());
    }

    #[test]
    fn copy_is_deep() {
        let ps = MemPs::new();
        ps.patch_props(&p("/src"), vec![(true, prop("urn:x", "a", Some("<a>1</a>")))])
            .unwrap();
        ps.copy_props(&p("/src"), &p("/dst")).unwrap();
        // mutating the source afterwards leaves the copy alone.
        ps.patch_props(&p("/src"), vec![(false, prop("urn:x", "a", None))])
            .unwrap();
        assert_eq!(
            ps.get_prop(&p("/dst"), prop("urn:x", "a", None)).unwrap(),
            b"<a>1</a>"
        );
    }

    #[test]
    fn persistent_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("props");

        let ps = MemPs::persistent(&file);
        ps.patch_props(&p("/k"), vec![(true, prop("urn:x", "a", Some("<a>v</a>")))])
            .unwrap();

        let ps2 = MemPs::persistent(&file);
        assert_eq!(
            ps2.get_prop(&p("/k"), prop("urn:x", "a", None)).unwrap(),
            b"<a>v</a>"
        );
    }
}
