use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::DavResult;
use crate::body::Body;
use crate::davpath::DavPath;
use crate::util::{DavMethod, dav_method};

impl crate::DavInner {
    pub(crate) async fn handle_options(
        self,
        req: &Request<()>,
        path: DavPath,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        {
            let h = res.headers_mut();
            // compliance classes. class 2 needs a locksystem.
            if self.ls.is_some() {
                h.insert("dav", "1,2".parse().unwrap());
            } else {
                h.insert("dav", "1".parse().unwrap());
            }
            h.insert("ms-author-via", "DAV".parse().unwrap());
            h.typed_insert(headers::ContentLength(0));
        }

        let meta = self.fs.metadata(&path).await;

        // Helper to add a method to the array if it's allowed. If the
        // current method is not OPTIONS, leave out the current method
        // since we're probably called for MethodNotAllowed.
        let method = dav_method(req.method()).unwrap_or(DavMethod::Options);
        let islock = |m| m == DavMethod::Lock || m == DavMethod::Unlock;
        let mm = |v: &mut Vec<String>, m: &str, y: DavMethod| {
            if (y == DavMethod::Options || (y != method || islock(y) != islock(method)))
                && (!islock(y) || self.ls.is_some())
                && self.allow.map_or(true, |x| x.contains(y))
            {
                v.push(m.to_string());
            }
        };
        let mut v = Vec::new();

        let is_unmapped = meta.is_err();
        let is_file = meta.map(|m| m.is_file()).unwrap_or_default();

        if is_unmapped {
            mm(&mut v, "OPTIONS", DavMethod::Options);
            mm(&mut v, "MKCOL", DavMethod::MkCol);
            mm(&mut v, "PUT", DavMethod::Put);
            mm(&mut v, "LOCK", DavMethod::Lock);
        } else {
            if is_file {
                mm(&mut v, "HEAD", DavMethod::Head);
                mm(&mut v, "GET", DavMethod::Get);
                mm(&mut v, "PUT", DavMethod::Put);
            }
            mm(&mut v, "OPTIONS", DavMethod::Options);
            mm(&mut v, "PROPFIND", DavMethod::PropFind);
            mm(&mut v, "PROPPATCH", DavMethod::PropPatch);
            mm(&mut v, "COPY", DavMethod::Copy);
            if path.as_url_string() != "/" {
                mm(&mut v, "MOVE", DavMethod::Move);
                mm(&mut v, "DELETE", DavMethod::Delete);
            }
            mm(&mut v, "LOCK", DavMethod::Lock);
            mm(&mut v, "UNLOCK", DavMethod::Unlock);
        }

        res.headers_mut()
            .insert("allow", v.join(",").parse().unwrap());
        *res.status_mut() = StatusCode::OK;
        Ok(res)
    }
}
