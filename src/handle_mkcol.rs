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
    pub(crate) async fn handle_mkcol(
        self,
        req: &Request<()>,
        mut path: DavPath,
    ) -> DavResult<Response<Body>> {
        // any request body at all is refused (the 415 for a non-empty
        // body was already produced by the dispatcher).

        let mut res = Response::new(Body::empty());
        let meta = self.fs.metadata(&path).await;

        // check the conditional headers.
        let tokens = match if_match_get_tokens(
            req,
            meta.as_ref().ok().map(|b| &**b),
            &*self.fs,
            self.ls.as_deref(),
            &path,
        )
        .await
        {
            Ok(t) => t,
            Err(s) => return Err(DavError::Status(s)),
        };

        // the new collection modifies the parent; a depth-infinity
        // lock covering this path must be presented.
        if let Some(ref locksystem) = self.ls {
            let t = tokens.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
            let principal = self.principal.as_deref();
            if locksystem.check(&path, principal, false, false, t).is_err() {
                return Err(DavError::Status(SC::LOCKED));
            }
        }

        match self.fs.create_dir(&path).await {
            // RFC 4918 9.3.1 MKCOL Status Codes.
            Err(FsError::Exists) => Err(DavError::Status(SC::METHOD_NOT_ALLOWED)),
            Err(FsError::NotFound) => Err(DavError::Status(SC::CONFLICT)),
            Err(e) => Err(DavError::FsError(e)),
            Ok(()) => {
                if let Some(ref locksystem) = self.ls {
                    locksystem.enroll(&path);
                }
                if !path.is_collection() {
                    path.add_slash();
                    res.headers_mut()
                        .typed_insert(davheaders::ContentLocation(path.as_url_string_with_prefix()));
                }
                res.headers_mut().typed_insert(headers::ContentLength(0));
                *res.status_mut() = SC::CREATED;
                Ok(res)
            },
        }
    }
}
