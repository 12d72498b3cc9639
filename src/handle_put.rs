use std::io;

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Request, Response};

use crate::DavResult;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;

impl crate::DavInner {
    pub(crate) async fn handle_put<ReqBody>(
        self,
        req: &Request<()>,
        path: DavPath,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: Stream<Item = io::Result<Bytes>> + Send,
    {
        // transformed request bodies are not supported.
        if req.headers().contains_key("content-encoding") {
            return Err(DavError::StatusClose(SC::NOT_IMPLEMENTED));
        }
        if req.headers().contains_key("content-range") {
            return Err(DavError::StatusClose(SC::NOT_IMPLEMENTED));
        }

        let mut count = 0;
        let mut have_count = false;

        if let Some(n) = req.headers().typed_get::<headers::ContentLength>() {
            count = n.0;
            have_count = true;
        } else if let Some(n) = req
            .headers()
            .get("X-Expected-Entity-Length")
            .and_then(|v| v.to_str().ok())
        {
            // macOS Finder, see https://evertpot.com/260/
            if let Ok(len) = n.parse() {
                count = len;
                have_count = true;
            }
        }

        let meta = self.fs.metadata(&path).await;

        // the target may not be a collection, and the parent must be one.
        if path.is_collection() || meta.as_ref().map(|m| m.is_dir()).unwrap_or(false) {
            return Err(DavError::StatusClose(SC::BAD_REQUEST));
        }
        if !self.has_parent(&path).await {
            return Err(DavError::StatusClose(SC::BAD_REQUEST));
        }

        // check the conditional headers. For a target that is being
        // created this includes any depth-infinity lock on the parent,
        // since those cover the new resource as well.
        let tokens = if_match_get_tokens(
            req,
            meta.as_ref().ok().map(|b| &**b),
            &*self.fs,
            self.ls.as_deref(),
            &path,
        )
        .await;
        let tokens = match tokens {
            Ok(t) => t,
            Err(s) => return Err(DavError::StatusClose(s)),
        };

        // if the resource is locked, we must hold the lock.
        if let Some(ref locksystem) = self.ls {
            let t = tokens.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
            let principal = self.principal.as_deref();
            if locksystem.check(&path, principal, false, false, t).is_err() {
                return Err(DavError::StatusClose(SC::LOCKED));
            }
        }

        let mut oo = OpenOptions::write();
        oo.create = true;
        oo.truncate = true;
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

        let mut file = match self.fs.open(&path, oo).await {
            Ok(f) => f,
            Err(FsError::NotFound) | Err(FsError::Exists) => {
                let s = if !oo.create || oo.create_new {
                    SC::PRECONDITION_FAILED
                } else {
                    SC::CONFLICT
                };
                return Err(DavError::StatusClose(s));
            },
            Err(e) => return Err(DavError::FsError(e)),
        };

        // close connection on error from here on.
        let mut res = Response::new(Body::empty());
        res.headers_mut().typed_insert(headers::Connection::close());
        res.headers_mut().typed_insert(headers::AcceptRanges::bytes());

        // loop, read body, write to file.
        let mut body = Box::pin(body);
        let mut total = 0u64;
        while let Some(data) = body.next().await {
            let chunk = data?;
            total += chunk.len() as u64;
            // consistency check.
            if have_count && total > count {
                break;
            }
            file.write_bytes(chunk).await?;
        }
        file.flush().await?;

        if have_count && total > count {
            error!("PUT file: sender is sending more bytes than expected");
            return Err(DavError::StatusClose(SC::BAD_REQUEST));
        }
        if have_count && total < count {
            error!("PUT file: premature EOF on input");
            return Err(DavError::StatusClose(SC::BAD_REQUEST));
        }

        // the data is flushed; only now is the resource enrolled in
        // covering depth-infinity locks, and the status emitted.
        if let Some(ref locksystem) = self.ls {
            locksystem.enroll(&path);
        }

        // report whether we created or updated the file.
        res.headers_mut().typed_insert(headers::ContentLength(0));
        *res.status_mut() = match meta {
            Ok(_) => SC::OK,
            Err(_) => SC::CREATED,
        };

        // no errors, the connection may be kept open.
        res.headers_mut().remove(http::header::CONNECTION);

        if let Ok(m) = file.metadata().await {
            if let Some(etag) = davheaders::ETag::from_meta(&*m) {
                res.headers_mut().typed_insert(etag);
            }
            if let Ok(modified) = m.modified() {
                res.headers_mut()
                    .typed_insert(headers::LastModified::from(modified));
            }
        }
        Ok(res)
    }
}
