//
// This module contains the main entry point of the library, DavHandler.
//
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use futures_util::stream::{Stream, StreamExt};
use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::DavResult;
use crate::auth::DomainController;
use crate::body::{Body, InBody};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::DavFileSystem;
use crate::ls::DavLockSystem;
use crate::ps::DavPropSystem;
use crate::realm::RealmTable;
use crate::util::{DavMethod, DavMethodSet, dav_method, systemtime_to_httpdate};

/// Server descriptor, shown on generated HTML pages.
pub(crate) const SERVER_DESCRIPTOR: &str =
    concat!("dav-fileserver/", env!("CARGO_PKG_VERSION"), " WebDAV server");

/// The webdav handler struct.
///
/// The `builder` and `build_handler` methods are used to instantiate a
/// handler; `handle` does the actual work.
#[derive(Clone)]
pub struct DavHandler {
    config: Arc<DavConfig>,
}

/// Configuration of the handler.
#[derive(Default)]
pub struct DavConfig {
    /// Realm table: URL prefix → filesystem backend.
    realms: RealmTable,
    /// Locksystem backend.
    ls: Option<Box<dyn DavLockSystem>>,
    /// Dead-property backend.
    ps: Option<Box<dyn DavPropSystem>>,
    /// Domain controller for Basic authentication.
    dc: Option<Box<dyn DomainController>>,
    /// Set of allowed methods (None means "all methods").
    allow: Option<DavMethodSet>,
    /// Principal is webdav speak for "user", used to give locks an
    /// owner when no domain controller is configured.
    principal: Option<String>,
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build_handler(self) -> DavHandler {
        DavHandler {
            config: Arc::new(self),
        }
    }

    /// Add a realm: requests under the URL prefix are served from
    /// the given filesystem.
    pub fn realm(mut self, prefix: impl Into<String>, fs: Box<dyn DavFileSystem>) -> Self {
        self.realms.add(prefix, fs);
        self
    }

    /// Match realm prefixes case-insensitively.
    pub fn case_insensitive_realms(mut self, ci: bool) -> Self {
        self.realms.set_case_insensitive(ci);
        self
    }

    /// Set the locksystem to use.
    pub fn locksystem(mut self, ls: Box<dyn DavLockSystem>) -> Self {
        self.ls = Some(ls);
        self
    }

    /// Set the dead-property store to use.
    pub fn propsystem(mut self, ps: Box<dyn DavPropSystem>) -> Self {
        self.ps = Some(ps);
        self
    }

    /// Set the domain controller that validates Basic credentials.
    pub fn domain_controller(mut self, dc: Box<dyn DomainController>) -> Self {
        self.dc = Some(dc);
        self
    }

    /// Which methods to allow (default is all methods).
    pub fn allow_methods(mut self, allow: DavMethodSet) -> Self {
        self.allow = Some(allow);
        self
    }

    /// Set the name of the "webdav principal". This will be the owner
    /// of any created locks.
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

// The actual inner struct, valid for one request: the resolved
// realm's filesystem plus the process-wide managers.
pub(crate) struct DavInner {
    pub fs: Box<dyn DavFileSystem>,
    pub ls: Option<Box<dyn DavLockSystem>>,
    pub ps: Option<Box<dyn DavPropSystem>>,
    pub allow: Option<DavMethodSet>,
    pub principal: Option<String>,
    // Destination: header, resolved through the realm table.
    pub destination: Option<DavPath>,
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Handle a webdav request.
    ///
    /// Errors are turned into HTML error responses, so this never
    /// fails; client I/O problems surface in the returned body stream.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send,
    {
        let (parts, body) = req.into_parts();
        let req = Request::from_parts(parts, ());
        let body = InBody::from(body);

        let mut resp = match self.handle2(req, body).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            },
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                error_response(err)
            },
        };
        let h = resp.headers_mut();
        if !h.contains_key(http::header::DATE) {
            h.typed_insert(headers::Date::from(SystemTime::now()));
        }
        resp
    }

    // internal dispatcher.
    async fn handle2<ReqBody>(&self, req: Request<()>, body: ReqBody) -> DavResult<Response<Body>>
    where ReqBody: Stream<Item = std::io::Result<Bytes>> + Send {
        let config = &*self.config;

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            },
        };

        // see if the method is allowed.
        if let Some(ref a) = config.allow {
            if !a.contains(method) {
                debug!("method {} not allowed on request {}", req.method(), req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }

        // OPTIONS *: answer with the server-global capabilities,
        // before any realm is resolved.
        let raw_path = DavPath::from_uri(req.uri())?;
        if raw_path.is_star() {
            return if method == DavMethod::Options {
                Ok(self.global_options())
            } else {
                Err(DavError::Status(StatusCode::BAD_REQUEST))
            };
        }

        if config.realms.is_empty() {
            return Err(DavError::Status(StatusCode::NOT_FOUND));
        }

        // resolve the realm and the request path within it.
        let (realm, path) = config.realms.resolve(req.uri().path())?;

        // authenticate against the realm's domain controller.
        let principal = match config.dc {
            Some(ref dc) => match authenticate(&req, dc.as_ref(), realm.prefix()) {
                Ok(user) => Some(user),
                Err(challenge) => return Ok(challenge),
            },
            None => config.principal.clone(),
        };

        // a Destination: header resolves through the same table, and
        // must point into the same realm.
        let destination = match req.headers().typed_get::<davheaders::Destination>() {
            Some(dest) => {
                let (drealm, dpath) = config.realms.resolve_destination(&dest.0)?;
                if drealm.prefix() != realm.prefix() {
                    debug!("destination {} crosses realms", dest.0);
                    return Err(DavError::Status(StatusCode::BAD_REQUEST));
                }
                Some(dpath)
            },
            None => None,
        };

        let inner = DavInner {
            fs: realm.fs.clone(),
            ls: config.ls.clone(),
            ps: config.ps.clone(),
            allow: config.allow,
            principal,
            destination,
        };

        // PUT is the only handler that streams the body. All the
        // other handlers get a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, inner.read_request(body, 65536).await?),
        };

        // Not all methods accept a body.
        match method {
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock => {},
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            },
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::Options => inner.handle_options(&req, path).await,
            DavMethod::PropFind => inner.handle_propfind(&req, path, body_data).await,
            DavMethod::PropPatch => inner.handle_proppatch(&req, path, body_data).await,
            DavMethod::MkCol => inner.handle_mkcol(&req, path).await,
            DavMethod::Delete => inner.handle_delete(&req, path).await,
            DavMethod::Lock => inner.handle_lock(&req, path, body_data).await,
            DavMethod::Unlock => inner.handle_unlock(&req, path).await,
            DavMethod::Head | DavMethod::Get => inner.handle_get(&req, path).await,
            DavMethod::Put => inner.handle_put(&req, path, body_strm.unwrap()).await,
            DavMethod::Copy | DavMethod::Move => inner.handle_copymove(&req, path, method).await,
        }
    }

    // OPTIONS with a "*" request target.
    fn global_options(&self) -> Response<Body> {
        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.insert("dav", "1,2".parse().unwrap());
        h.insert("ms-author-via", "DAV".parse().unwrap());
        h.typed_insert(headers::ContentLength(0));
        let methods = [
            "OPTIONS", "HEAD", "GET", "PUT", "DELETE", "PROPFIND", "PROPPATCH", "MKCOL", "COPY",
            "MOVE", "LOCK", "UNLOCK",
        ];
        h.insert("allow", methods.join(",").parse().unwrap());
        res
    }
}

impl DavInner {
    // helper.
    pub(crate) async fn has_parent<'a>(&'a self, path: &'a DavPath) -> bool {
        let p = path.parent();
        self.fs.metadata(&p).await.map(|m| m.is_dir()).unwrap_or(false)
    }

    // See if this is a directory and if so, if we have
    // to fixup the path by adding a slash at the end.
    pub(crate) fn fixpath(
        &self,
        res: &mut Response<Body>,
        path: &mut DavPath,
        meta: Box<dyn crate::fs::DavMetaData>,
    ) -> Box<dyn crate::fs::DavMetaData> {
        if meta.is_dir() && !path.is_collection() {
            path.add_slash();
            let newloc = path.as_url_string_with_prefix();
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(newloc));
        }
        meta
    }

    // read the entire request body, up to a limit.
    pub(crate) async fn read_request<'a, ReqBody>(
        &'a self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where ReqBody: Stream<Item = std::io::Result<Bytes>> + Send + 'a {
        let mut data = Vec::new();
        let mut body = Box::pin(body);
        while let Some(res) = body.next().await {
            let chunk = res?;
            if data.len() + chunk.len() > max_size {
                return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

// Validate Basic credentials with the domain controller. The error
// side is the 401 challenge to send back.
fn authenticate(
    req: &Request<()>,
    dc: &dyn DomainController,
    realm_prefix: &str,
) -> Result<String, Response<Body>> {
    let auth_realm = dc.realm_for(realm_prefix);
    if let Some(Authorization(basic)) = req.headers().typed_get::<Authorization<Basic>>() {
        if dc.authenticate(&auth_realm, basic.username(), basic.password()) {
            return Ok(basic.username().to_string());
        }
        debug!("authentication failed for {}", basic.username());
    }
    let challenge = format!("Basic realm=\"{}\"", auth_realm.replace('"', ""));
    let resp = Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("WWW-Authenticate", challenge)
        .header("content-length", "0")
        .body(Body::empty())
        .unwrap();
    Err(resp)
}

// Render a DavError as a response; 4xx/5xx get a small HTML body with
// a diagnostic and the server descriptor line.
fn error_response(err: DavError) -> Response<Body> {
    let status = err.statuscode();
    let mut rb = Response::builder().status(status);
    if err.must_close() {
        rb = rb.header("connection", "close");
    }
    if status == StatusCode::NOT_MODIFIED || status == StatusCode::NO_CONTENT {
        return rb
            .header("content-length", "0")
            .body(Body::empty())
            .unwrap();
    }
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<html><head><title>{code} {reason}</title></head>\n\
         <body><h1>{code} {reason}</h1>\n\
         <p>{err}</p>\n\
         <hr noshade>\n\
         <address>{descriptor} - {date}</address>\n\
         </body></html>\n",
        code = status.as_u16(),
        reason = reason,
        err = err,
        descriptor = SERVER_DESCRIPTOR,
        date = systemtime_to_httpdate(SystemTime::now()),
    );
    rb.header("content-type", "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}
