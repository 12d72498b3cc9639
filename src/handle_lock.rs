use std::io::Cursor;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Request, Response};
use xmltree::Element;

use crate::DavResult;
use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional::{dav_if_match, if_match};
use crate::davheaders::{self, DavTimeout, Depth, Timeout};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{FsError, OpenOptions};
use crate::ls::{DavLock, DavLockSystem};
use crate::multierror::{MultiError, multi_error};
use crate::xmltree_ext::{self, ElementExt};

impl crate::DavInner {
    pub(crate) async fn handle_lock(
        self,
        req: &Request<()>,
        mut path: DavPath,
        xmldata: Vec<u8>,
    ) -> DavResult<Response<Body>> {
        // must have a locksystem or bail.
        let locksystem = match self.ls {
            Some(ref ls) => ls.clone(),
            None => return Err(DavError::Status(SC::METHOD_NOT_ALLOWED)),
        };

        let mut res = Response::new(Body::empty());

        // path and meta.
        let meta = match self.fs.metadata(&path).await {
            Ok(meta) => Some(self.fixpath(&mut res, &mut path, meta)),
            Err(_) => None,
        };

        let principal = self.principal.as_deref();

        // no body: this is a lock refresh.
        if xmldata.is_empty() {
            // the token to refresh comes from the If: header.
            let (_, tokens) = dav_if_match(req, &*self.fs, Some(&*locksystem), &path).await;
            if tokens.len() != 1 {
                return Err(DavError::Status(SC::BAD_REQUEST));
            }

            let timeout = get_timeout(req);
            let lock = match locksystem.refresh(&path, &tokens[0], timeout) {
                Ok(lock) => lock,
                Err(_) => return Err(DavError::Status(SC::PRECONDITION_FAILED)),
            };

            let prop = build_lock_prop(&lock, true);
            let buf = write_prop_body(&prop)?;
            res.headers_mut()
                .typed_insert(davheaders::ContentType("application/xml; charset=utf-8".into()));
            res.headers_mut().typed_insert(headers::ContentLength(buf.len() as u64));
            *res.status_mut() = SC::OK;
            *res.body_mut() = Body::from(buf);
            return Ok(res);
        }

        // Depth: 0 or infinity only.
        let deep = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => true,
            Some(Depth::Zero) => false,
            _ => return Err(DavError::Status(SC::BAD_REQUEST)),
        };

        // handle the conditional headers.
        if let Some(s) = if_match(
            req,
            meta.as_ref().map(|m| &**m),
            &*self.fs,
            Some(&*locksystem),
            &path,
        )
        .await
        {
            return Err(DavError::Status(s));
        }

        // parse the lockinfo body.
        let tree = Element::parse2(Cursor::new(xmldata))?;
        if tree.name != "lockinfo" {
            return Err(DavError::XmlParseError);
        }

        let mut shared: Option<bool> = None;
        let mut owner: Option<Element> = None;
        let mut locktype = false;

        for elem in tree.child_elems_iter() {
            match elem.name.as_str() {
                "lockscope" => match elem.child_elems_iter().next().map(|e| e.name.as_str()) {
                    Some("exclusive") => shared = Some(false),
                    Some("shared") => shared = Some(true),
                    _ => return Err(DavError::XmlParseError),
                },
                "locktype" => match elem.child_elems_iter().next().map(|e| e.name.as_str()) {
                    // "write" is the only lock type there is.
                    Some("write") => locktype = true,
                    _ => return Err(DavError::XmlParseError),
                },
                "owner" => {
                    let mut o = elem.clone();
                    o.prefix = Some("D".to_owned());
                    owner = Some(o);
                },
                _ => return Err(DavError::XmlParseError),
            }
        }

        let Some(shared) = shared else {
            return Err(DavError::XmlParseError);
        };
        if !locktype {
            return Err(DavError::XmlParseError);
        }

        // try to take the lock.
        let timeout = get_timeout(req);
        let lock = match locksystem.lock(&path, principal, owner.as_ref(), timeout, shared, deep) {
            Ok(lock) => lock,
            Err(conflict) => {
                // a conflict somewhere else in the subtree is reported
                // as a multistatus: the conflicting resource carries
                // 423, the request URL the dependent failure.
                let conflict_path = conflict.path.clone();
                if !deep || conflict_path == path {
                    return Err(DavError::Status(SC::LOCKED));
                }
                let req_path = path.clone();
                let items = AsyncStream::new(|tx| async move {
                    let mut multierror = MultiError::new(tx);
                    multierror.add_status(&conflict_path, SC::LOCKED).await?;
                    multierror.add_status(&path, SC::FAILED_DEPENDENCY).await?;
                    Ok(())
                });
                return multi_error(req_path, items).await;
            },
        };

        // locking a null resource creates an empty file.
        if meta.is_none() {
            let mut oo = OpenOptions::write();
            oo.create = true;
            if req
                .headers()
                .typed_get::<davheaders::IfMatch>()
                .map_or(false, |h| h.0 == davheaders::ETagList::Star)
            {
                oo.create = false;
            }
            if req
                .headers()
                .typed_get::<davheaders::IfNoneMatch>()
                .map_or(false, |h| h.0 == davheaders::ETagList::Star)
            {
                oo.create_new = true;
            }
            match self.fs.open(&path, oo).await {
                Ok(_) => {},
                Err(FsError::NotFound) | Err(FsError::Exists) => {
                    let s = if !oo.create || oo.create_new {
                        SC::PRECONDITION_FAILED
                    } else {
                        SC::CONFLICT
                    };
                    locksystem.unlock(&path, &lock.token).ok();
                    return Err(DavError::Status(s));
                },
                Err(e) => {
                    locksystem.unlock(&path, &lock.token).ok();
                    return Err(DavError::FsError(e));
                },
            };
        }

        // output the lock discovery.
        res.headers_mut().typed_insert(davheaders::LockToken(
            "<".to_string() + &lock.token + ">",
        ));
        *res.status_mut() = if meta.is_none() { SC::CREATED } else { SC::OK };

        let prop = build_lock_prop(&lock, true);
        let buf = write_prop_body(&prop)?;
        res.headers_mut()
            .typed_insert(davheaders::ContentType("application/xml; charset=utf-8".into()));
        res.headers_mut().typed_insert(headers::ContentLength(buf.len() as u64));
        *res.body_mut() = Body::from(buf);

        Ok(res)
    }

    pub(crate) async fn handle_unlock(
        self,
        req: &Request<()>,
        mut path: DavPath,
    ) -> DavResult<Response<Body>> {
        // must have a locksystem or bail.
        let locksystem = match self.ls {
            Some(ref ls) => ls.clone(),
            None => return Err(DavError::Status(SC::METHOD_NOT_ALLOWED)),
        };

        // must have a Lock-Token header.
        let t = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .ok_or(DavError::Status(SC::BAD_REQUEST))?;
        let token = t.0.trim_matches(|c| c == '<' || c == '>');

        let mut res = Response::new(Body::empty());
        if let Ok(meta) = self.fs.metadata(&path).await {
            self.fixpath(&mut res, &mut path, meta);
        }

        // the token must cover this URL, and belong to the presenter.
        let lock = locksystem
            .discover(&path)
            .into_iter()
            .find(|l| l.token == token);
        let owned = match lock {
            Some(ref l) => match (&l.principal, &self.principal) {
                (Some(owner), Some(user)) => owner == user,
                (Some(_), None) => false,
                (None, _) => true,
            },
            None => false,
        };
        if !owned {
            return Err(DavError::Status(SC::BAD_REQUEST));
        }

        match locksystem.unlock(&path, token) {
            Ok(_) => {
                res.headers_mut().typed_insert(headers::ContentLength(0));
                *res.status_mut() = SC::NO_CONTENT;
                Ok(res)
            },
            Err(_) => Err(DavError::Status(SC::BAD_REQUEST)),
        }
    }
}

pub(crate) fn list_lockdiscovery(ls: Option<&dyn DavLockSystem>, path: &DavPath) -> Element {
    let mut elem = Element::new2("D:lockdiscovery");

    // must have a locksystem or bail.
    let locksystem = match ls {
        Some(ls) => ls,
        None => return elem,
    };

    // list the locks.
    for lock in &locksystem.discover(path) {
        elem.push(build_lock_prop(lock, false));
    }
    elem
}

pub(crate) fn list_supportedlock(ls: Option<&dyn DavLockSystem>) -> Element {
    let mut elem = Element::new2("D:supportedlock");

    if ls.is_none() {
        return elem;
    }

    let mut entry = Element::new2("D:lockentry");
    let mut scope = Element::new2("D:lockscope");
    scope.push(Element::new2("D:exclusive"));
    entry.push(scope);
    let mut ltype = Element::new2("D:locktype");
    ltype.push(Element::new2("D:write"));
    entry.push(ltype);
    elem.push(entry);

    let mut entry = Element::new2("D:lockentry");
    let mut scope = Element::new2("D:lockscope");
    scope.push(Element::new2("D:shared"));
    entry.push(scope);
    let mut ltype = Element::new2("D:locktype");
    ltype.push(Element::new2("D:write"));
    entry.push(ltype);
    elem.push(entry);

    elem
}

// Any value above ~10 years is taken to mean "never expire".
const MAX_FINITE_TIMEOUT: u64 = 10 * 365 * 24 * 60 * 60;
const DEFAULT_TIMEOUT: u64 = 604800; // one week

// process the Timeout: header. None means "never".
fn get_timeout(req: &Request<()>) -> Option<Duration> {
    match req.headers().typed_get::<Timeout>() {
        Some(Timeout(ref vec)) if !vec.is_empty() => match vec[0] {
            DavTimeout::Infinite => None,
            DavTimeout::Seconds(n) if n as u64 > MAX_FINITE_TIMEOUT => None,
            DavTimeout::Seconds(n) => Some(Duration::from_secs(n as u64)),
        },
        _ => Some(Duration::from_secs(DEFAULT_TIMEOUT)),
    }
}

fn build_lock_prop(lock: &DavLock, full: bool) -> Element {
    let mut actlock = Element::new2("D:activelock");

    let mut elem = Element::new2("D:lockscope");
    elem.push(match lock.shared {
        false => Element::new2("D:exclusive"),
        true => Element::new2("D:shared"),
    });
    actlock.push(elem);

    let mut elem = Element::new2("D:locktype");
    elem.push(Element::new2("D:write"));
    actlock.push(elem);

    actlock.push(Element::new_text(
        "D:depth",
        match lock.deep {
            false => "0",
            true => "Infinity",
        },
    ));

    // remaining time, not the originally requested timeout.
    let timeout = match lock.timeout_at {
        None => "Infinite".to_string(),
        Some(at) => {
            let secs = at
                .duration_since(SystemTime::now())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            format!("Second-{}", secs)
        },
    };
    actlock.push(Element::new_text("D:timeout", timeout));

    let mut locktokenelem = Element::new2("D:locktoken");
    locktokenelem.push(Element::new_text("D:href", lock.token.clone()));
    actlock.push(locktokenelem);

    let mut lockroot = Element::new2("D:lockroot");
    lockroot.push(Element::new_text(
        "D:href",
        lock.path.as_url_string_with_prefix(),
    ));
    actlock.push(lockroot);

    if let Some(ref o) = lock.owner {
        actlock.push(o.clone());
    }

    if !full {
        return actlock;
    }

    let mut ldis = Element::new2("D:lockdiscovery");
    ldis.push(actlock);
    let mut prop = Element::new2("D:prop").ns("D", "DAV:");
    prop.push(ldis);

    prop
}

fn write_prop_body(prop: &Element) -> DavResult<Bytes> {
    let mut emitter = xmltree_ext::emitter(Vec::new())?;
    prop.write_ev(&mut emitter)?;
    Ok(Bytes::from(emitter.into_inner()))
}
