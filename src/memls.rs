//! In-memory locksystem with optional file persistence.
//!
//! The registry keeps two indexes, both keyed by strings: URL → set of
//! lock tokens, and token → lock record (which carries its URL set), so
//! neither direction owns the other. All mutators serialize through a
//! single writer lock; lookups iterate over snapshot copies of the
//! per-URL token sets, because observing an expired lock reaps it.
//!
//! Create the instance once, using `MemLs::new` or `MemLs::persistent`,
//! and clone() it every time you pass it to the DavHandler. A MemLs
//! struct is just a handle, cloning is cheap.
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::kvfile::KvFile;
use crate::ls::*;

/// Locksystem backed by two in-memory hash tables, optionally
/// persisted to a key/value file so reboots recover lock state.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<MemLsImpl>);

#[derive(Debug)]
struct MemLsImpl {
    inner: Mutex<MemLsInner>,
    store: Option<KvFile>,
}

#[derive(Debug, Default)]
struct MemLsInner {
    loaded: bool,
    by_token: HashMap<String, LockRec>,
    by_url: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone)]
struct LockRec {
    lock: DavLock,
    urls: HashSet<String>,
}

impl MemLs {
    /// Create a new ephemeral "memls" locksystem.
    pub fn new() -> Box<MemLs> {
        Box::new(MemLs(Arc::new(MemLsImpl {
            inner: Mutex::new(MemLsInner {
                loaded: true,
                ..MemLsInner::default()
            }),
            store: None,
        })))
    }

    /// Create a locksystem persisted in the key/value file at `path`.
    ///
    /// The file is opened lazily, by whichever request touches the
    /// locksystem first.
    pub fn persistent<P: AsRef<Path>>(path: P) -> Box<MemLs> {
        Box::new(MemLs(Arc::new(MemLsImpl {
            inner: Mutex::new(MemLsInner::default()),
            store: Some(KvFile::new(path)),
        })))
    }
}

// URL keys are stored without a trailing slash (except the root).
fn norm_url(path: &DavPath) -> String {
    let mut s = path.as_display_string();
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

// "/a/b/c" -> ["/a/b/c", "/a/b", "/a", "/"]
fn self_and_ancestors(url: &str) -> Vec<String> {
    let mut v = Vec::new();
    let mut cur = url.to_string();
    loop {
        v.push(cur.clone());
        if cur == "/" {
            break;
        }
        match cur.rfind('/') {
            Some(0) => cur = "/".to_string(),
            Some(idx) => cur.truncate(idx),
            None => break,
        }
    }
    v
}

fn is_descendant(url: &str, of: &str) -> bool {
    if of == "/" {
        return url != "/";
    }
    url.len() > of.len() && url.starts_with(of) && url.as_bytes()[of.len()] == b'/'
}

impl DavLockSystem for MemLs {
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock> {
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);

        // any conflicting locks on the node or its ancestors?
        for l in covering(inner, &url) {
            if !l.shared || !shared {
                trace!("lock: conflict with {} at {}", l.token, url);
                return Err(l);
            }
        }

        // a deep lock must also check the entire subtree below.
        if deep {
            for l in below(inner, &url) {
                if !l.shared || !shared {
                    trace!("lock: conflict below with {}", l.token);
                    return Err(l);
                }
            }
        }

        // generate a token. collisions are astronomically unlikely,
        // but retry anyway.
        let mut token = gen_token();
        while inner.by_token.contains_key(&token) {
            token = gen_token();
        }

        let lock = DavLock {
            token: token.clone(),
            path: path.clone(),
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout_at: timeout.map(|d| SystemTime::now() + d),
            timeout,
            shared,
            deep,
        };
        trace!("lock {} created at {}", &lock.token, url);

        let mut urls = HashSet::new();
        urls.insert(url.clone());
        inner.by_token.insert(token.clone(), LockRec {
            lock: lock.clone(),
            urls,
        });
        inner.by_url.entry(url).or_default().insert(token);

        self.0.save(inner);
        Ok(lock)
    }

    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()> {
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);
        if !validate(inner, token) {
            trace!("unlock: {} not live", token);
            return Err(());
        }
        if !covering(inner, &url).iter().any(|l| l.token == token) {
            trace!("unlock: {} does not cover {}", token, url);
            return Err(());
        }
        delete_token(inner, token);
        self.0.save(inner);
        Ok(())
    }

    fn refresh(
        &self,
        path: &DavPath,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<DavLock, ()> {
        trace!("refresh lock {}", token);
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);
        if !validate(inner, token) || !covering(inner, &url).iter().any(|l| l.token == token) {
            return Err(());
        }
        let rec = inner.by_token.get_mut(token).ok_or(())?;
        rec.lock.timeout = timeout;
        rec.lock.timeout_at = timeout.map(|d| SystemTime::now() + d);
        let lock = rec.lock.clone();
        self.0.save(inner);
        Ok(lock)
    }

    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: Vec<&str>,
    ) -> Result<(), DavLock> {
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);

        let held = |l: &DavLock| {
            submitted_tokens.iter().any(|t| l.token == *t)
                && (ignore_principal || principal == l.principal.as_deref())
        };

        // Exclusive locks we don't hold are fatal. For shared locks,
        // holding any one of them is enough.
        let mut holds_lock = false;
        let mut first_shared: Option<DavLock> = None;
        for l in covering(inner, &url) {
            if held(&l) {
                holds_lock = true;
            } else if !l.shared {
                trace!("check: exclusive conflict {} at {}", l.token, url);
                return Err(l);
            } else if first_shared.is_none() {
                first_shared = Some(l);
            }
        }
        if !holds_lock {
            if let Some(l) = first_shared {
                trace!("check: shared conflict {} at {}", l.token, url);
                return Err(l);
            }
        }

        // a deep operation must hold every lock in the subtree.
        if deep {
            for l in below(inner, &url) {
                if !held(&l) {
                    trace!("check: subtree conflict {}", l.token);
                    return Err(l);
                }
            }
        }
        Ok(())
    }

    fn discover(&self, path: &DavPath) -> Vec<DavLock> {
        let inner = &mut *self.0.lock_inner();
        covering(inner, &norm_url(path))
    }

    fn delete(&self, path: &DavPath) -> Result<(), ()> {
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);
        let urls = inner
            .by_url
            .keys()
            .filter(|u| *u == &url || is_descendant(u, &url))
            .cloned()
            .collect::<Vec<_>>();
        for u in urls {
            remove_url(inner, &u);
        }
        self.0.save(inner);
        Ok(())
    }

    fn enroll(&self, path: &DavPath) {
        let inner = &mut *self.0.lock_inner();
        let url = norm_url(path);
        let parent = norm_url(&path.parent());
        let tokens = covering(inner, &parent)
            .into_iter()
            .filter(|l| l.deep)
            .map(|l| l.token)
            .collect::<Vec<_>>();
        let mut changed = false;
        for token in tokens {
            if let Some(rec) = inner.by_token.get_mut(&token) {
                if rec.urls.insert(url.clone()) {
                    trace!("enroll: {} joins {}", url, token);
                    inner.by_url.entry(url.clone()).or_default().insert(token);
                    changed = true;
                }
            }
        }
        if changed {
            self.0.save(inner);
        }
    }
}

impl MemLsImpl {
    // Take the writer lock, loading the persistent store on first use.
    fn lock_inner(&self) -> parking_lot::MutexGuard<'_, MemLsInner> {
        let mut inner = self.inner.lock();
        if !inner.loaded {
            if let Some(ref store) = self.store {
                match store.load() {
                    Ok(map) => load_state(&mut inner, &map),
                    Err(e) => error!("memls: cannot load lock store: {}", e),
                }
            }
            inner.loaded = true;
        }
        inner
    }

    fn save(&self, inner: &MemLsInner) {
        let Some(ref store) = self.store else {
            return;
        };
        if let Err(e) = store.save(&dump_state(inner)) {
            error!("memls: cannot save lock store: {}", e);
        }
    }
}

fn gen_token() -> String {
    format!("opaquelocktoken:{}", Uuid::new_v4())
}

// Is the lock live? Reap it if not.
fn validate(inner: &mut MemLsInner, token: &str) -> bool {
    let expired = match inner.by_token.get(token) {
        None => return false,
        Some(rec) => match rec.lock.timeout_at {
            None => false,
            Some(t) => t < SystemTime::now(),
        },
    };
    if expired {
        trace!("lock {} expired, reaping", token);
        delete_token(inner, token);
        return false;
    }
    true
}

fn delete_token(inner: &mut MemLsInner, token: &str) {
    if let Some(rec) = inner.by_token.remove(token) {
        for url in rec.urls {
            if let Some(set) = inner.by_url.get_mut(&url) {
                set.remove(token);
                if set.is_empty() {
                    inner.by_url.remove(&url);
                }
            }
        }
    }
}

// Drop one URL from every lock that lists it; locks left without
// any URL are released.
fn remove_url(inner: &mut MemLsInner, url: &str) {
    let tokens = match inner.by_url.get(url) {
        Some(set) => set.iter().cloned().collect::<Vec<_>>(),
        None => return,
    };
    for token in tokens {
        if !validate(inner, &token) {
            continue;
        }
        let empty = match inner.by_token.get_mut(&token) {
            Some(rec) => {
                rec.urls.remove(url);
                rec.urls.is_empty()
            },
            None => continue,
        };
        if empty {
            delete_token(inner, &token);
        }
    }
    inner.by_url.remove(url);
}

// All live locks covering `url`: associated with it directly, or with
// an ancestor and depth-infinity. An enrolled member is associated
// with its lock twice (directly and via the root), so report each
// token once.
fn covering(inner: &mut MemLsInner, url: &str) -> Vec<DavLock> {
    let mut found: Vec<DavLock> = Vec::new();
    for (i, ancestor) in self_and_ancestors(url).into_iter().enumerate() {
        let tokens = match inner.by_url.get(&ancestor) {
            Some(set) => set.iter().cloned().collect::<Vec<_>>(),
            None => continue,
        };
        for token in tokens {
            if !validate(inner, &token) {
                continue;
            }
            let rec = &inner.by_token[&token];
            if (i == 0 || rec.lock.deep) && !found.iter().any(|l| l.token == token) {
                found.push(rec.lock.clone());
            }
        }
    }
    found
}

// All live locks associated with URLs strictly below `url`.
fn below(inner: &mut MemLsInner, url: &str) -> Vec<DavLock> {
    let urls = inner
        .by_url
        .keys()
        .filter(|u| is_descendant(u, url))
        .cloned()
        .collect::<Vec<_>>();
    let mut found = Vec::new();
    for u in urls {
        let tokens = match inner.by_url.get(&u) {
            Some(set) => set.iter().cloned().collect::<Vec<_>>(),
            None => continue,
        };
        for token in tokens {
            if validate(inner, &token) {
                found.push(inner.by_token[&token].lock.clone());
            }
        }
    }
    found
}

// Persistence. Key scheme: FIELD:token / URLLOCK:url / LOCKURLS:token.
const NEVER: i64 = -1;

fn dump_state(inner: &MemLsInner) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (token, rec) in &inner.by_token {
        let time = match rec.lock.timeout_at {
            None => NEVER,
            Some(t) => t
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(NEVER),
        };
        map.insert(format!("LOCKTIME:{}", token), time.to_string());
        map.insert(
            format!("LOCKUSER:{}", token),
            rec.lock.principal.clone().unwrap_or_default(),
        );
        map.insert(format!("LOCKTYPE:{}", token), "write".to_string());
        map.insert(
            format!("LOCKSCOPE:{}", token),
            if rec.lock.shared { "shared" } else { "exclusive" }.to_string(),
        );
        map.insert(
            format!("LOCKDEPTH:{}", token),
            if rec.lock.deep { "infinity" } else { "0" }.to_string(),
        );
        let owner = match rec.lock.owner {
            Some(ref o) => {
                let mut v = Vec::new();
                o.write(&mut v).ok();
                String::from_utf8_lossy(&v).to_string()
            },
            None => String::new(),
        };
        map.insert(format!("LOCKOWNER:{}", token), owner);
        map.insert(
            format!("LOCKROOT:{}", token),
            rec.lock.path.as_url_string_with_prefix(),
        );
        let urls = rec.urls.iter().cloned().collect::<Vec<_>>();
        map.insert(
            format!("LOCKURLS:{}", token),
            serde_json::to_string(&urls).unwrap_or_default(),
        );
    }
    for (url, tokens) in &inner.by_url {
        let tokens = tokens.iter().cloned().collect::<Vec<_>>();
        map.insert(
            format!("URLLOCK:{}", url),
            serde_json::to_string(&tokens).unwrap_or_default(),
        );
    }
    map
}

fn load_state(inner: &mut MemLsInner, map: &HashMap<String, String>) {
    let get = |field: &str, token: &str| map.get(&format!("{}:{}", field, token));
    for (key, root) in map {
        let Some(token) = key.strip_prefix("LOCKROOT:") else {
            continue;
        };
        let Ok(path) = DavPath::new(root) else {
            continue;
        };
        let timeout_at = match get("LOCKTIME", token).and_then(|v| v.parse::<i64>().ok()) {
            Some(t) if t >= 0 => Some(UNIX_EPOCH + Duration::from_secs(t as u64)),
            _ => None,
        };
        let principal = get("LOCKUSER", token)
            .filter(|s| !s.is_empty())
            .cloned();
        let owner = get("LOCKOWNER", token)
            .filter(|s| !s.is_empty())
            .and_then(|s| Element::parse(Cursor::new(s.as_bytes())).ok());
        let shared = get("LOCKSCOPE", token).map(|s| s == "shared").unwrap_or(false);
        let deep = get("LOCKDEPTH", token).map(|s| s == "infinity").unwrap_or(false);
        let urls: HashSet<String> = get("LOCKURLS", token)
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .map(|v| v.into_iter().collect())
            .unwrap_or_default();
        for url in &urls {
            inner
                .by_url
                .entry(url.clone())
                .or_default()
                .insert(token.to_string());
        }
        inner.by_token.insert(token.to_string(), LockRec {
            lock: DavLock {
                token: token.to_string(),
                path,
                principal,
                owner,
                timeout_at,
                timeout: None,
                shared,
                deep,
            },
            urls,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn exclusive(ls: &MemLs, path: &str, deep: bool) -> Result<DavLock, DavLock> {
        ls.lock(&p(path), Some("alice"), None, Some(Duration::from_secs(600)), false, deep)
    }

    #[test]
    fn index_integrity() {
        let ls = MemLs::new();
        let l1 = exclusive(&ls, "/d/a", true).unwrap();
        ls.enroll(&p("/d/a/x"));

        {
            let inner = &mut *ls.0.lock_inner();
            for (token, rec) in &inner.by_token {
                for url in &rec.urls {
                    assert!(inner.by_url[url].contains(token));
                }
            }
            for (url, tokens) in &inner.by_url {
                for token in tokens {
                    assert!(inner.by_token[token].urls.contains(url));
                }
            }
        }

        // releasing drops both directions atomically.
        ls.unlock(&p("/d/a"), &l1.token).unwrap();
        let inner = &mut *ls.0.lock_inner();
        assert!(inner.by_token.is_empty());
        assert!(inner.by_url.is_empty());
    }

    #[test]
    fn exclusive_excludes() {
        let ls = MemLs::new();
        exclusive(&ls, "/f", false).unwrap();
        assert!(exclusive(&ls, "/f", false).is_err());
        assert!(ls.lock(&p("/f"), None, None, None, true, false).is_err());
    }

    #[test]
    fn shared_locks_coexist() {
        let ls = MemLs::new();
        let l1 = ls.lock(&p("/s"), Some("a"), None, None, true, false).unwrap();
        let l2 = ls.lock(&p("/s"), Some("b"), None, None, true, false).unwrap();
        assert_ne!(l1.token, l2.token);
        // but a third exclusive lock is refused.
        assert!(exclusive(&ls, "/s", false).is_err());
        // holding any one shared lock is enough to mutate.
        assert!(ls.check(&p("/s"), Some("a"), false, false, vec![&l1.token]).is_ok());
        assert!(ls.check(&p("/s"), None, true, false, vec![]).is_err());
    }

    #[test]
    fn deep_lock_covers_subtree() {
        let ls = MemLs::new();
        let l = exclusive(&ls, "/d", true).unwrap();
        assert!(ls.check(&p("/d/sub/file"), None, true, false, vec![]).is_err());
        assert!(ls.check(&p("/d/sub/file"), None, true, false, vec![&l.token]).is_ok());
        // a new deep lock conflicts with existing locks below.
        assert!(exclusive(&ls, "/", true).is_err());
    }

    #[test]
    fn expired_locks_are_invisible() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/e"), None, None, Some(Duration::from_secs(0)), false, false)
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ls.discover(&p("/e")).is_empty());
        assert!(ls.refresh(&p("/e"), &l.token, None).is_err());
        // and a new lock can be taken.
        assert!(exclusive(&ls, "/e", false).is_ok());
    }

    #[test]
    fn delete_drops_subtree_associations() {
        let ls = MemLs::new();
        let l = exclusive(&ls, "/d", true).unwrap();
        ls.enroll(&p("/d/newfile"));
        ls.delete(&p("/d")).unwrap();
        assert!(ls.discover(&p("/d")).is_empty());
        assert!(ls.discover(&p("/d/newfile")).is_empty());
        assert!(ls.refresh(&p("/d"), &l.token, None).is_err());
    }

    #[test]
    fn persistent_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("locks");

        let ls = MemLs::persistent(&file);
        let l = ls
            .lock(&p("/p/x"), Some("alice"), None, None, false, true)
            .unwrap();

        // a fresh instance reads the same file.
        let ls2 = MemLs::persistent(&file);
        let locks = ls2.discover(&p("/p/x/below"));
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].token, l.token);
        assert_eq!(locks[0].principal.as_deref(), Some("alice"));
        assert!(locks[0].deep);
        assert!(locks[0].timeout_at.is_none());
    }
}
