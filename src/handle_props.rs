use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::LazyLock;

use bytes::Bytes;
use futures_util::{FutureExt, StreamExt, future::BoxFuture};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use xml::EmitterConfig;
use xml::common::XmlVersion;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;
use xmltree::{Element, XMLNode};

use crate::DavResult;
use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::handle_lock::{list_lockdiscovery, list_supportedlock};
use crate::ls::DavLockSystem;
use crate::ps::{DavProp, DavPropSystem};
use crate::util::MemBuffer;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::DavInner;
use crate::xmltree_ext::{self, ElementExt};

const NS_DAV_URI: &str = "DAV:";

// The DAV: namespace is reserved for this known set of live or
// protected names; none of them can ever be a dead property.
pub(crate) const RESERVED_DAV_NAMES: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontenttype",
    "resourcetype",
    "getlastmodified",
    "getcontentlength",
    "getetag",
    "getcontentlanguage",
    "source",
    "lockdiscovery",
    "supportedlock",
];

// properties returned by PROPFIND <allprop/>, <propname/>, or an
// empty body. The file-only ones drop out on collections.
const ALLPROP_STR: &[&str] = &[
    "D:creationdate",
    "D:displayname",
    "D:getcontentlength",
    "D:getcontenttype",
    "D:getetag",
    "D:getlastmodified",
    "D:lockdiscovery",
    "D:resourcetype",
    "D:supportedlock",
];

static ALLPROP: LazyLock<Vec<Element>> = LazyLock::new(|| {
    ALLPROP_STR
        .iter()
        .map(|a| {
            let mut e = Element::new2(*a);
            e.namespace = Some(NS_DAV_URI.to_string());
            e
        })
        .collect()
});

type Emitter = EventWriter<MemBuffer>;
type Sender = crate::async_stream::Sender<Bytes, io::Error>;

struct StatusElement {
    status: StatusCode,
    element: Element,
}

struct PropWriter {
    emitter: Emitter,
    tx: Option<Sender>,
    name: String,
    props: Vec<Element>,
    ls: Option<Box<dyn DavLockSystem>>,
    ps: Option<Box<dyn DavPropSystem>>,
    // namespace uri -> generated unique prefix for dead properties.
    ns_map: HashMap<String, String>,
}

impl DavInner {
    pub(crate) async fn handle_propfind(
        self,
        req: &Request<()>,
        mut path: DavPath,
        xmldata: Vec<u8>,
    ) -> DavResult<Response<Body>> {
        // No checks on If: and If-* headers here, because I do not see
        // the point and there's nothing in RFC 4918 that indicates we
        // should.

        let mut res = Response::new(Body::empty());

        res.headers_mut()
            .typed_insert(headers::CacheControl::new().with_no_cache());
        res.headers_mut().typed_insert(headers::Pragma::no_cache());

        let depth = req
            .headers()
            .typed_get::<davheaders::Depth>()
            .unwrap_or(davheaders::Depth::Infinity);

        let meta = self.fs.metadata(&path).await?;
        let meta = self.fixpath(&mut res, &mut path, meta);

        let mut root = None;
        if !xmldata.is_empty() {
            root = match Element::parse(Cursor::new(xmldata)) {
                Ok(t) => {
                    if t.name == "propfind"
                        && t.namespace.as_deref() == Some(NS_DAV_URI)
                    {
                        Some(t)
                    } else {
                        return Err(DavError::XmlParseError);
                    }
                },
                Err(_) => return Err(DavError::XmlParseError),
            };
        }

        let (name, props) = match root {
            None => ("allprop", Vec::new()),
            Some(elem) => {
                let mut elem = elem;
                let includes = elem
                    .take_child("include")
                    .map_or(Vec::new(), |n| n.take_child_elems());
                match elem
                    .child_elems_into_iter()
                    .find(|e| e.name == "propname" || e.name == "prop" || e.name == "allprop")
                {
                    Some(elem) => match elem.name.as_str() {
                        "propname" => ("propname", Vec::new()),
                        "prop" => ("prop", elem.take_child_elems()),
                        "allprop" => ("allprop", includes),
                        _ => return Err(DavError::XmlParseError),
                    },
                    None => return Err(DavError::XmlParseError),
                }
            },
        };

        trace!("propfind: type request: {}", name);

        let mut pw = PropWriter::new(&mut res, name, props, self.ls.clone(), self.ps.clone())?;

        *res.body_mut() = Body::from(AsyncStream::new(|tx| async move {
            pw.set_tx(tx);
            let is_dir = meta.is_dir();
            pw.write_props(&path, &*meta)?;
            pw.flush().await?;

            if is_dir && depth != davheaders::Depth::Zero {
                self.propfind_directory(&path, depth, &mut pw).await?;
            }
            pw.close().await?;

            Ok(())
        }));

        Ok(res)
    }

    fn propfind_directory<'a>(
        &'a self,
        path: &'a DavPath,
        depth: davheaders::Depth,
        propwriter: &'a mut PropWriter,
    ) -> BoxFuture<'a, Result<(), io::Error>> {
        async move {
            let mut entries = match self.fs.read_dir(path).await {
                Ok(entries) => entries,
                Err(e) => {
                    // if we cannot read_dir, just skip it.
                    error!("read_dir error {:?}", e);
                    return Ok(());
                },
            };

            while let Some(dirent) = entries.next().await {
                let mut npath = path.clone();
                npath.push_segment(&dirent.name());
                let meta = match dirent.metadata().await {
                    Ok(meta) => meta,
                    Err(e) => {
                        trace!("metadata error on {}. Skipping {:?}", npath, e);
                        continue;
                    },
                };
                if meta.is_symlink() {
                    continue;
                }
                let is_dir = meta.is_dir();
                npath.add_slash_if(is_dir);
                propwriter.write_props(&npath, &*meta)?;
                propwriter.flush().await?;
                if depth == davheaders::Depth::Infinity && is_dir {
                    self.propfind_directory(&npath, depth, propwriter).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    pub(crate) async fn handle_proppatch(
        self,
        req: &Request<()>,
        mut path: DavPath,
        xmldata: Vec<u8>,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // file must exist.
        let meta = self.fs.metadata(&path).await?;
        let meta = self.fixpath(&mut res, &mut path, meta);

        // check the conditional headers.
        let tokens = match if_match_get_tokens(
            req,
            Some(&*meta),
            &*self.fs,
            self.ls.as_deref(),
            &path,
        )
        .await
        {
            Ok(t) => t,
            Err(s) => return Err(DavError::Status(s)),
        };

        // if the resource is locked, we must hold the lock.
        if let Some(ref locksystem) = self.ls {
            let t = tokens.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
            let principal = self.principal.as_deref();
            if locksystem.check(&path, principal, false, false, t).is_err() {
                return Err(DavError::Status(StatusCode::LOCKED));
            }
        }

        trace!(target: "xml", "proppatch input:\n{}]\n", String::from_utf8_lossy(&xmldata));

        // parse the propertyupdate body.
        let tree = Element::parse2(Cursor::new(xmldata))?;
        if tree.name != "propertyupdate" {
            return Err(DavError::XmlParseError);
        }

        let can_deadprop = self.ps.is_some();
        let mut patch = Vec::new();
        let mut ret = Vec::new();

        // First pass: "check". Writes into the DAV: namespace are
        // refused, it is reserved for the live properties; everything
        // else is queued for the apply pass.
        for elem in tree.child_elems_iter() {
            let set = match elem.name.as_str() {
                "set" => true,
                "remove" => false,
                _ => continue,
            };
            for n in elem
                .child_elems_iter()
                .filter(|e| e.name == "prop")
                .flat_map(|e| e.child_elems_iter())
            {
                if n.namespace.as_deref() == Some(NS_DAV_URI) {
                    // the DAV: namespace is reserved; the known live
                    // and protected names answer 409, anything else in
                    // it is refused as well.
                    let status = if RESERVED_DAV_NAMES.contains(&n.name.as_str()) {
                        StatusCode::CONFLICT
                    } else {
                        StatusCode::FORBIDDEN
                    };
                    ret.push((status, element_to_davprop(n)));
                } else if !can_deadprop {
                    ret.push((StatusCode::FORBIDDEN, element_to_davprop(n)));
                } else if set {
                    patch.push((true, element_to_davprop_full(n)?));
                } else {
                    patch.push((false, element_to_davprop(n)));
                }
            }
        }

        // Second pass: "apply". Any check failure turns every other
        // update into a dependency failure, and nothing is applied.
        if !ret.is_empty() {
            ret.extend(
                patch
                    .into_iter()
                    .map(|(_, p)| (StatusCode::FAILED_DEPENDENCY, p)),
            );
        } else if !patch.is_empty() {
            let propsystem = self.ps.as_ref().unwrap();
            ret = propsystem.patch_props(&path, patch)?;
        }

        // group the updates by statuscode.
        let mut hm: HashMap<StatusCode, Vec<DavProp>> = HashMap::new();
        for (code, prop) in ret.into_iter() {
            hm.entry(code).or_default().push(prop);
        }

        // And reply.
        let mut pw = PropWriter::new(&mut res, "propertyupdate", Vec::new(), None, None)?;
        *res.body_mut() = Body::from(AsyncStream::new(|tx| async move {
            pw.set_tx(tx);
            pw.write_propstat_response(&path, hm)?;
            pw.close().await?;
            Ok::<_, io::Error>(())
        }));

        Ok(res)
    }
}

impl PropWriter {
    fn new(
        res: &mut Response<Body>,
        name: &str,
        mut props: Vec<Element>,
        ls: Option<Box<dyn DavLockSystem>>,
        ps: Option<Box<dyn DavPropSystem>>,
    ) -> DavResult<PropWriter> {
        let contenttype = "application/xml; charset=utf-8".parse().unwrap();
        res.headers_mut().insert("content-type", contenttype);
        *res.status_mut() = StatusCode::MULTI_STATUS;

        let mut emitter = EventWriter::new_with_config(MemBuffer::new(), EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            ..Default::default()
        });
        emitter.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;

        if name != "prop" && name != "propertyupdate" {
            let mut v = Vec::new();
            for a in ALLPROP.iter() {
                if !props
                    .iter()
                    .any(|e| a.namespace == e.namespace && a.name == e.name)
                {
                    v.push(a.clone());
                }
            }
            props.append(&mut v);
        }

        let ev = XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI);
        emitter.write(ev)?;

        Ok(PropWriter {
            emitter,
            tx: None,
            name: name.to_string(),
            props,
            ls,
            ps,
            ns_map: HashMap::new(),
        })
    }

    fn set_tx(&mut self, tx: Sender) {
        self.tx = Some(tx)
    }

    fn build_elem<T>(&self, content: bool, e: &Element, text: T) -> StatusElement
    where T: Into<String> {
        let mut elem = Element {
            prefix: Some("D".to_string()),
            namespace: None,
            namespaces: None,
            name: e.name.clone(),
            attributes: HashMap::new(),
            children: Vec::new(),
        };
        if content {
            let t: String = text.into();
            if !t.is_empty() {
                elem.children.push(XMLNode::Text(t));
            }
        }
        StatusElement {
            status: StatusCode::OK,
            element: elem,
        }
    }

    // Build the value of a single property for one resource. Live
    // DAV: properties are derived from the file metadata and the
    // locksystem, everything else comes from the dead-property store.
    fn build_prop(
        &mut self,
        prop: &Element,
        path: &DavPath,
        meta: &dyn DavMetaData,
        docontent: bool,
    ) -> StatusElement {
        let mut is_dav = false;

        if prop.namespace.as_deref() == Some(NS_DAV_URI) {
            is_dav = true;
            match prop.name.as_str() {
                "creationdate" => {
                    if let Ok(time) = meta.created() {
                        let tm = systemtime_to_rfc3339(time);
                        return self.build_elem(docontent, prop, tm);
                    }
                    // use ctime instead - apache seems to do this.
                    if let Ok(ctime) = meta.status_changed() {
                        let mut time = ctime;
                        if let Ok(mtime) = meta.modified() {
                            if mtime < ctime {
                                time = mtime;
                            }
                        }
                        let tm = systemtime_to_rfc3339(time);
                        return self.build_elem(docontent, prop, tm);
                    }
                },
                "displayname" => {
                    return self.build_elem(docontent, prop, path.as_display_string());
                },
                "getetag" => {
                    if !meta.is_dir() {
                        if let Some(etag) = meta.etag() {
                            return self.build_elem(docontent, prop, etag);
                        }
                    }
                },
                "getcontentlength" => {
                    if !meta.is_dir() {
                        return self.build_elem(docontent, prop, meta.len().to_string());
                    }
                },
                "getcontenttype" => {
                    return if meta.is_dir() {
                        self.build_elem(docontent, prop, "text/html")
                    } else {
                        self.build_elem(docontent, prop, path.get_mime_type_str())
                    };
                },
                "getlastmodified" => {
                    if let Ok(time) = meta.modified() {
                        let tm = systemtime_to_httpdate(time);
                        return self.build_elem(docontent, prop, tm);
                    }
                },
                "resourcetype" => {
                    let mut elem = self.build_elem(docontent, prop, "").element;
                    if meta.is_dir() && docontent {
                        elem.push(Element::new2("D:collection"));
                    }
                    return StatusElement {
                        status: StatusCode::OK,
                        element: elem,
                    };
                },
                "supportedlock" => {
                    return StatusElement {
                        status: StatusCode::OK,
                        element: list_supportedlock(self.ls.as_deref()),
                    };
                },
                "lockdiscovery" => {
                    return StatusElement {
                        status: StatusCode::OK,
                        element: list_lockdiscovery(self.ls.as_deref(), path),
                    };
                },
                // getcontentlanguage, source: not maintained.
                _ => {},
            }
        }

        // a dead property, but only when asked for by name.
        if !is_dav && self.name == "prop" {
            if let Some(ref propsystem) = self.ps {
                let dprop = element_to_davprop(prop);
                if let Ok(xml) = propsystem.get_prop(path, dprop) {
                    if let Ok(e) = Element::parse(Cursor::new(xml)) {
                        return StatusElement {
                            status: StatusCode::OK,
                            element: e,
                        };
                    }
                }
            }
        }

        let elem = if is_dav {
            self.build_elem(false, prop, "").element
        } else {
            self.davprop_to_element(element_to_davprop(prop))
        };
        StatusElement {
            status: StatusCode::NOT_FOUND,
            element: elem,
        }
    }

    fn write_props(&mut self, path: &DavPath, meta: &dyn DavMetaData) -> Result<(), io::Error> {
        // A HashMap<StatusCode, Vec<Element>> for the result.
        let mut props: HashMap<StatusCode, Vec<Element>> = HashMap::new();

        // Get the requested properties one by one.
        let do_content = self.name != "propname";
        let wanted = std::mem::take(&mut self.props);
        for p in &wanted {
            let res = self.build_prop(p, path, meta, do_content);
            // in allprop/propname mode, only the present ones.
            if res.status == StatusCode::OK || self.name == "prop" {
                props.entry(res.status).or_default().push(res.element);
            }
        }
        self.props = wanted;

        // and list the dead properties as well.
        if self.name == "propname" || self.name == "allprop" {
            if let Some(propsystem) = self.ps.clone() {
                if let Ok(v) = propsystem.get_props(path, do_content) {
                    for dprop in v {
                        let elem = match dprop.xml {
                            Some(ref xml) => Element::parse(Cursor::new(xml.clone()))
                                .unwrap_or_else(|_| self.davprop_to_element(dprop.clone())),
                            None => self.davprop_to_element(dprop.clone()),
                        };
                        props.entry(StatusCode::OK).or_default().push(elem);
                    }
                }
            }
        }

        self.write_propstat_elems(path, props)
            .map_err(io::Error::from)
    }

    // One <D:response> with the propstats grouped (coalesced) per
    // status code.
    fn write_propstat_elems(
        &mut self,
        path: &DavPath,
        props: HashMap<StatusCode, Vec<Element>>,
    ) -> Result<(), DavError> {
        self.emitter.write(XmlWEvent::start_element("D:response"))?;
        Element::new_text("D:href", path.as_url_string_with_prefix())
            .write_ev(&mut self.emitter)?;

        let mut keys = props.keys().collect::<Vec<_>>();
        keys.sort();
        for status in keys {
            let v = props.get(status).unwrap();
            self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("D:prop"))?;
            for i in v.iter() {
                i.write_ev(&mut self.emitter)?;
            }
            self.emitter.write(XmlWEvent::end_element())?;
            Element::new_text("D:status", format!("HTTP/1.1 {}", status))
                .write_ev(&mut self.emitter)?;
            self.emitter.write(XmlWEvent::end_element())?;
        }

        self.emitter.write(XmlWEvent::end_element())?; // response

        Ok(())
    }

    // Same, from DavProps (PROPPATCH reply).
    fn write_propstat_response(
        &mut self,
        path: &DavPath,
        props: HashMap<StatusCode, Vec<DavProp>>,
    ) -> Result<(), io::Error> {
        let mut hm: HashMap<StatusCode, Vec<Element>> = HashMap::new();
        for (status, v) in props.into_iter() {
            let elems = v
                .into_iter()
                .map(|p| self.davprop_to_element(p))
                .collect::<Vec<_>>();
            hm.insert(status, elems);
        }
        self.write_propstat_elems(path, hm).map_err(io::Error::from)
    }

    // Turn a property name into an element. DAV: keeps the "D"
    // prefix; other namespaces get a generated unique prefix, so that
    // colliding default namespaces cannot confuse clients.
    fn davprop_to_element(&mut self, prop: DavProp) -> Element {
        let mut elem = Element::new(&prop.name);
        match prop.namespace.as_deref() {
            Some(NS_DAV_URI) => {
                elem.prefix = Some("D".to_string());
            },
            Some(ns) if !ns.is_empty() => {
                let next = format!("R{}", self.ns_map.len());
                let pfx = self.ns_map.entry(ns.to_string()).or_insert(next).clone();
                let ns = ns.to_string();
                elem = elem.ns(pfx.clone(), ns);
                elem.prefix = Some(pfx);
            },
            _ => {},
        }
        elem
    }

    async fn flush(&mut self) -> Result<(), io::Error> {
        let buffer = self.emitter.inner_mut().take();
        self.tx.as_mut().unwrap().send(buffer).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), io::Error> {
        let _ = self.emitter.write(XmlWEvent::end_element());
        self.flush().await
    }
}

fn element_to_davprop_full(elem: &Element) -> DavResult<DavProp> {
    // make sure the fragment carries its namespace declarations, then
    // store it pre-serialized so set-then-get is byte exact.
    let xml = xmltree_ext::element_to_bytes(elem)?;
    Ok(DavProp {
        name: elem.name.clone(),
        prefix: elem.prefix.clone(),
        namespace: elem.namespace.clone().or_else(|| Some(String::new())),
        xml: Some(xml),
    })
}

fn element_to_davprop(elem: &Element) -> DavProp {
    DavProp {
        name: elem.name.clone(),
        prefix: elem.prefix.clone(),
        namespace: elem.namespace.clone().or_else(|| Some(String::new())),
        xml: None,
    }
}
