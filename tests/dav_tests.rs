use dav_fileserver::{
    DavHandler,
    auth::SimpleDomainController,
    body::Body,
    localfs::LocalFs,
    memls::MemLs,
    memps::MemPs,
    ps::DavPropSystem,
};
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, StatusCode};
use tempfile::TempDir;

struct TestServer {
    #[allow(dead_code)]
    dir: TempDir,
    ls: Box<MemLs>,
    ps: Box<MemPs>,
}

impl TestServer {
    fn new() -> TestServer {
        TestServer {
            dir: tempfile::tempdir().unwrap(),
            ls: MemLs::new(),
            ps: MemPs::new(),
        }
    }

    // One handler per client: same backends, different principal.
    fn handler(&self, principal: &str) -> DavHandler {
        DavHandler::builder()
            .realm("/r", LocalFs::new(self.dir.path(), true))
            .locksystem(self.ls.clone())
            .propsystem(self.ps.clone())
            .principal(principal)
            .build_handler()
    }
}

async fn resp_to_string(mut resp: http::Response<Body>) -> String {
    let mut data = Vec::new();
    let body = resp.body_mut();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => data.extend_from_slice(&bytes),
            Err(e) => panic!("Error reading body stream: {}", e),
        }
    }
    String::from_utf8(data).unwrap_or_default()
}

fn req(method: &str, uri: &str) -> http::request::Builder {
    Request::builder().method(method).uri(uri)
}

async fn put(dav: &DavHandler, uri: &str, content: &str) -> http::Response<Body> {
    let r = req("PUT", uri)
        .header("content-length", content.len().to_string())
        .body(Body::from(content.to_string()))
        .unwrap();
    dav.handle(r).await
}

async fn mkcol(dav: &DavHandler, uri: &str) -> http::Response<Body> {
    dav.handle(req("MKCOL", uri).body(Body::empty()).unwrap()).await
}

const LOCKINFO_EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>litmus test suite</D:href></D:owner>
</D:lockinfo>"#;

async fn lock_exclusive(dav: &DavHandler, uri: &str, depth: &str) -> http::Response<Body> {
    let r = req("LOCK", uri)
        .header("Depth", depth)
        .header("content-length", LOCKINFO_EXCLUSIVE.len().to_string())
        .body(Body::from(LOCKINFO_EXCLUSIVE))
        .unwrap();
    dav.handle(r).await
}

fn lock_token(resp: &http::Response<Body>) -> String {
    resp.headers()
        .get("lock-token")
        .unwrap()
        .to_str()
        .unwrap()
        .trim_matches(|c| c == '<' || c == '>')
        .to_string()
}

#[tokio::test]
async fn test_put_then_get() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");

    let resp = put(&dav, "/r/a.txt", "abc").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let resp = dav.handle(req("GET", "/r/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("etag").unwrap().to_str().unwrap(),
        etag
    );
    assert_eq!(resp_to_string(resp).await, "abc");
}

#[tokio::test]
async fn test_conditional_get() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");

    let resp = put(&dav, "/r/a.txt", "abc").await;
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let resp = dav
        .handle(
            req("GET", "/r/a.txt")
                .header("If-None-Match", &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(resp_to_string(resp).await, "");
}

#[tokio::test]
async fn test_if_match_mismatch_fails_put() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/a.txt", "abc").await;

    let resp = dav
        .handle(
            req("PUT", "/r/a.txt")
                .header("If-Match", "\"bogus-etag\"")
                .header("content-length", "3")
                .body(Body::from("xyz"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_get_range() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/num.txt", "0123456789").await;

    // two ranges: only the first coalesced range is honored.
    let resp = dav
        .handle(
            req("GET", "/r/num.txt")
                .header("Range", "bytes=0-0,-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap().to_str().unwrap(),
        "bytes 0-0/10"
    );
    assert_eq!(resp_to_string(resp).await, "0");

    // overlapping ranges coalesce into one.
    let resp = dav
        .handle(
            req("GET", "/r/num.txt")
                .header("Range", "bytes=2-4,3-6")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap().to_str().unwrap(),
        "bytes 2-6/10"
    );
    assert_eq!(resp_to_string(resp).await, "23456");
}

#[tokio::test]
async fn test_range_not_satisfiable() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/num.txt", "0123456789").await;

    let resp = dav
        .handle(
            req("GET", "/r/num.txt")
                .header("Range", "bytes=50-60")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_exclusive_lock_blocks_second_client() {
    let srv = TestServer::new();
    let alice = srv.handler("alice");
    let bob = srv.handler("bob");

    put(&alice, "/r/a.txt", "abc").await;

    // client X takes an exclusive depth-0 lock.
    let resp = lock_exclusive(&alice, "/r/a.txt", "0").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);
    assert!(token.starts_with("opaquelocktoken:"));
    let body = resp_to_string(resp).await;
    assert!(body.contains("lockdiscovery"));
    assert!(body.contains(&token));

    // client Y may not write without presenting the token.
    let resp = put(&bob, "/r/a.txt", "nope").await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // client X may, with the token in the If: header.
    let resp = alice
        .handle(
            req("PUT", "/r/a.txt")
                .header("If", format!("(<{}>)", token))
                .header("content-length", "3")
                .body(Body::from("def"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_lock_refresh_and_unlock() {
    let srv = TestServer::new();
    let alice = srv.handler("alice");
    put(&alice, "/r/a.txt", "abc").await;

    let resp = lock_exclusive(&alice, "/r/a.txt", "0").await;
    let token = lock_token(&resp);

    // refresh: LOCK without a body, token in the If: header.
    let resp = alice
        .handle(
            req("LOCK", "/r/a.txt")
                .header("If", format!("(<{}>)", token))
                .header("Timeout", "Second-3600")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp_to_string(resp).await;
    assert!(body.contains("Second-"));

    // unlock needs the Lock-Token header.
    let resp = alice
        .handle(
            req("UNLOCK", "/r/a.txt")
                .header("Lock-Token", format!("<{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // repeated UNLOCK of a released token is 400.
    let resp = alice
        .handle(
            req("UNLOCK", "/r/a.txt")
                .header("Lock-Token", format!("<{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unlock_wrong_owner() {
    let srv = TestServer::new();
    let alice = srv.handler("alice");
    let bob = srv.handler("bob");
    put(&alice, "/r/a.txt", "abc").await;

    let resp = lock_exclusive(&alice, "/r/a.txt", "0").await;
    let token = lock_token(&resp);

    let resp = bob
        .handle(
            req("UNLOCK", "/r/a.txt")
                .header("Lock-Token", format!("<{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deep_lock_covers_created_children() {
    let srv = TestServer::new();
    let alice = srv.handler("alice");
    let bob = srv.handler("bob");
    mkcol(&alice, "/r/d").await;

    let resp = lock_exclusive(&alice, "/r/d", "infinity").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);

    // a child create by someone else is refused.
    let resp = put(&bob, "/r/d/new.txt", "x").await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // the owner can create it, and it joins the lock.
    let resp = alice
        .handle(
            req("PUT", "/r/d/new.txt")
                .header("If", format!("(<{}>)", token))
                .header("content-length", "1")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // lockdiscovery on the new child reports the same token.
    let resp = alice
        .handle(
            req("PROPFIND", "/r/d/new.txt")
                .header("Depth", "0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert!(resp_to_string(resp).await.contains(&token));
}

#[tokio::test]
async fn test_mkcol() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");

    let resp = mkcol(&dav, "/r/newdir").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // again: already exists.
    let resp = mkcol(&dav, "/r/newdir").await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // missing parent.
    let resp = mkcol(&dav, "/r/no/such/dir").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // a request body is not acceptable.
    let resp = dav
        .handle(
            req("MKCOL", "/r/otherdir")
                .header("content-length", "7")
                .body(Body::from("<x></x>"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_copy_no_overwrite() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/x", "source").await;
    put(&dav, "/r/y", "dest").await;

    let resp = dav
        .handle(
            req("COPY", "/r/x")
                .header("Destination", "/r/y")
                .header("Overwrite", "F")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    // overwrite T (the default) replaces it.
    let resp = dav
        .handle(
            req("COPY", "/r/x")
                .header("Destination", "/r/y")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = dav.handle(req("GET", "/r/y").body(Body::empty()).unwrap()).await;
    assert_eq!(resp_to_string(resp).await, "source");
}

#[tokio::test]
async fn test_copy_to_self_and_cross_realm() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/x", "source").await;

    let resp = dav
        .handle(
            req("COPY", "/r/x")
                .header("Destination", "/r/x")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // a destination outside any realm is a bad request.
    let resp = dav
        .handle(
            req("COPY", "/r/x")
                .header("Destination", "/elsewhere/x")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_move_carries_properties() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    mkcol(&dav, "/r/d").await;
    put(&dav, "/r/d/f.txt", "data").await;

    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:set><D:prop><Z:color>blue</Z:color></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = dav
        .handle(
            req("PROPPATCH", "/r/d/f.txt")
                .header("content-length", patch.len().to_string())
                .body(Body::from(patch))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);

    let resp = dav
        .handle(
            req("MOVE", "/r/d")
                .header("Destination", "/r/e")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // source is gone.
    let resp = dav.handle(req("GET", "/r/d/f.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // the dead property traveled along.
    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propfind xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:prop><Z:color/></D:prop>
        </D:propfind>"#;
    let resp = dav
        .handle(
            req("PROPFIND", "/r/e/f.txt")
                .header("Depth", "0")
                .header("content-length", find.len().to_string())
                .body(Body::from(find))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = resp_to_string(resp).await;
    assert!(body.contains("blue"), "{}", body);
}

#[tokio::test]
async fn test_delete_partial_failure_multistatus() {
    let srv = TestServer::new();
    let alice = srv.handler("alice");
    let bob = srv.handler("bob");

    mkcol(&alice, "/r/d").await;
    put(&alice, "/r/d/a", "one").await;
    put(&alice, "/r/d/b", "two").await;

    // bob locks one child; alice doesn't present any token.
    let resp = lock_exclusive(&bob, "/r/d/a", "0").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = alice.handle(req("DELETE", "/r/d").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = resp_to_string(resp).await;
    assert!(body.contains("/r/d/a"), "{}", body);
    assert!(body.contains("423"), "{}", body);
    assert!(body.contains("424"), "{}", body);

    // the unlocked sibling is gone, the locked child is not.
    let resp = alice.handle(req("GET", "/r/d/b").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = alice.handle(req("GET", "/r/d/a").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_delete_simple_and_idempotence() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/gone.txt", "x").await;

    let resp = dav.handle(req("DELETE", "/r/gone.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // a second DELETE is 404.
    let resp = dav.handle(req("DELETE", "/r/gone.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_purges_props_and_locks() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/p.txt", "x").await;

    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:set><D:prop><Z:tag>v</Z:tag></D:prop></D:set>
        </D:propertyupdate>"#;
    dav.handle(
        req("PROPPATCH", "/r/p.txt")
            .header("content-length", patch.len().to_string())
            .body(Body::from(patch))
            .unwrap(),
    )
    .await;
    assert!(srv.ps.have_props(&dav_fileserver::davpath::DavPath::new("/r/p.txt").unwrap()));

    let resp = dav.handle(req("DELETE", "/r/p.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!srv.ps.have_props(&dav_fileserver::davpath::DavPath::new("/r/p.txt").unwrap()));
}

#[tokio::test]
async fn test_proppatch_roundtrip() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/f.txt", "x").await;

    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:set><D:prop><Z:flavour>strawberry</Z:flavour></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = dav
        .handle(
            req("PROPPATCH", "/r/f.txt")
                .header("content-length", patch.len().to_string())
                .body(Body::from(patch))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = resp_to_string(resp).await;
    assert!(body.contains("200 OK"), "{}", body);

    // read it back, value intact.
    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propfind xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:prop><Z:flavour/></D:prop>
        </D:propfind>"#;
    let resp = dav
        .handle(
            req("PROPFIND", "/r/f.txt")
                .header("Depth", "0")
                .header("content-length", find.len().to_string())
                .body(Body::from(find))
                .unwrap(),
        )
        .await;
    let body = resp_to_string(resp).await;
    assert!(body.contains("strawberry"), "{}", body);
}

#[tokio::test]
async fn test_proppatch_protected_props() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/f.txt", "x").await;

    // setting a protected DAV: property fails with 409, and drags the
    // other update down as a failed dependency.
    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:set><D:prop><D:getetag>"fake"</D:getetag></D:prop></D:set>
          <D:set><D:prop><Z:ok>1</Z:ok></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = dav
        .handle(
            req("PROPPATCH", "/r/f.txt")
                .header("content-length", patch.len().to_string())
                .body(Body::from(patch))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = resp_to_string(resp).await;
    assert!(body.contains("409"), "{}", body);
    assert!(body.contains("424"), "{}", body);

    // and nothing was applied.
    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propfind xmlns:D="DAV:" xmlns:Z="urn:x-test:">
          <D:prop><Z:ok/></D:prop>
        </D:propfind>"#;
    let resp = dav
        .handle(
            req("PROPFIND", "/r/f.txt")
                .header("Depth", "0")
                .header("content-length", find.len().to_string())
                .body(Body::from(find))
                .unwrap(),
        )
        .await;
    let body = resp_to_string(resp).await;
    assert!(body.contains("404"), "{}", body);
}

#[tokio::test]
async fn test_propfind_live_props() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    mkcol(&dav, "/r/dir").await;
    put(&dav, "/r/dir/file.txt", "hello").await;

    // allprop on the collection, depth 1.
    let resp = dav
        .handle(
            req("PROPFIND", "/r/dir")
                .header("Depth", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = resp_to_string(resp).await;
    assert!(body.contains("D:collection"), "{}", body);
    assert!(body.contains("file.txt"), "{}", body);
    assert!(body.contains("getcontentlength"), "{}", body);
    assert!(body.contains(">5<"), "{}", body);
    assert!(body.contains("supportedlock"), "{}", body);
    // collections serve text/html.
    assert!(body.contains("text/html"), "{}", body);
    assert!(body.contains("text/plain"), "{}", body);
}

#[tokio::test]
async fn test_get_dirlist() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    mkcol(&dav, "/r/dir").await;
    put(&dav, "/r/dir/file.txt", "hello").await;

    let resp = dav.handle(req("GET", "/r/dir/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "text/html; charset=utf-8"
    );
    let body = resp_to_string(resp).await;
    assert!(body.contains("file.txt"), "{}", body);
}

#[tokio::test]
async fn test_options() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");
    put(&dav, "/r/a.txt", "x").await;

    let resp = dav.handle(req("OPTIONS", "/r/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("dav").unwrap().to_str().unwrap(), "1,2");
    let allow = resp.headers().get("allow").unwrap().to_str().unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("LOCK"));

    // OPTIONS * answers the global capabilities.
    let resp = dav.handle(req("OPTIONS", "*").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("dav").unwrap().to_str().unwrap(), "1,2");
}

#[tokio::test]
async fn test_basic_auth() {
    let srv = TestServer::new();
    let dav = DavHandler::builder()
        .realm("/r", LocalFs::new(srv.dir.path(), true))
        .locksystem(srv.ls.clone())
        .propsystem(srv.ps.clone())
        .domain_controller(Box::new(
            SimpleDomainController::new().add_user("/r", "alice", "secret"),
        ))
        .build_handler();

    // without credentials: 401 + challenge.
    let resp = dav.handle(req("OPTIONS", "/r/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp.headers().get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.starts_with("Basic realm="));

    // with them, the request goes through.
    let mut r = req("OPTIONS", "/r/").body(Body::empty()).unwrap();
    r.headers_mut()
        .typed_insert(headers::Authorization::basic("alice", "secret"));
    let resp = dav.handle(r).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // wrong password: challenged again.
    let mut r = req("OPTIONS", "/r/").body(Body::empty()).unwrap();
    r.headers_mut()
        .typed_insert(headers::Authorization::basic("alice", "wrong"));
    let resp = dav.handle(r).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_put_rejects_content_codings() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");

    let resp = dav
        .handle(
            req("PUT", "/r/enc.txt")
                .header("content-encoding", "gzip")
                .header("content-length", "3")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

    let resp = dav
        .handle(
            req("PUT", "/r/rng.txt")
                .header("content-range", "bytes 0-2/3")
                .header("content-length", "3")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let srv = TestServer::new();
    let dav = srv.handler("alice");

    let resp = dav.handle(req("GET", "/elsewhere/x").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = dav.handle(req("GET", "/r/missing").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
