use std::cmp::Ordering;
use std::io::SeekFrom;

use bytes::Bytes;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::DavResult;
use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::ranges;

impl crate::DavInner {
    pub(crate) async fn handle_get(
        self,
        req: &Request<()>,
        path: DavPath,
    ) -> DavResult<Response<Body>> {
        let head = req.method() == http::Method::HEAD;

        // check if it's a directory.
        let meta = self.fs.metadata(&path).await?;
        if meta.is_dir() {
            // Depth is meaningless on a file download; a directory
            // always renders just its own index.
            return self.handle_dirlist(req, path, head).await;
        }

        // double check, is it a regular file.
        let mut file = self.fs.open(&path, OpenOptions::read()).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let len = meta.len();
        let mut start = 0;
        let mut count = len;

        let file_etag = davheaders::ETag::from_meta(&*meta);

        // an If-Range mismatch means the Range header is ignored.
        let mut do_range = match req.headers().typed_get::<davheaders::IfRange>() {
            Some(r) => conditional::ifrange_match(&r, file_etag.as_ref(), meta.modified().ok()),
            None => true,
        };

        let mut res = Response::new(Body::empty());

        // set Last-Modified and ETag headers.
        if let Ok(modified) = meta.modified() {
            res.headers_mut()
                .typed_insert(headers::LastModified::from(modified));
        }
        if let Some(ref etag) = file_etag {
            res.headers_mut().typed_insert(etag.clone());
        }

        // handle the conditional headers.
        if let Some(s) =
            conditional::if_match(req, Some(&*meta), &*self.fs, self.ls.as_deref(), &path).await
        {
            return Err(DavError::Status(s));
        }

        // see if we want to serve a range.
        if do_range {
            do_range = false;
            if let Some(header) = req.headers().get("range").and_then(|v| v.to_str().ok()) {
                if let Some(parsed) = ranges::parse_ranges(header, len) {
                    match parsed.ranges.first() {
                        None => {
                            // none of the ranges was satisfiable.
                            let r = format!("bytes */{}", len);
                            res.headers_mut().insert("content-range", r.parse().unwrap());
                            res.headers_mut().typed_insert(headers::ContentLength(0));
                            *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                            return Ok(res);
                        },
                        Some(range) => {
                            // of multiple ranges, only the first one is
                            // honored; we don't do multipart/byteranges.
                            start = range.start;
                            count = range.count;
                            do_range = true;
                        },
                    }
                }
            }
        }

        if do_range {
            // seek to the beginning of the requested data.
            if file.seek(SeekFrom::Start(start)).await.is_err() {
                *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                return Ok(res);
            }
            let r = format!("bytes {}-{}/{}", start, start + count - 1, len);
            res.headers_mut().insert("content-range", r.parse().unwrap());
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        } else {
            *res.status_mut() = StatusCode::OK;
        }

        res.headers_mut()
            .insert("content-type", path.get_mime_type_str().parse().unwrap());
        res.headers_mut().typed_insert(headers::ContentLength(count));
        res.headers_mut().typed_insert(headers::AcceptRanges::bytes());

        if head {
            return Ok(res);
        }

        // now just loop and send data.
        *res.body_mut() = Body::from(AsyncStream::new(|mut tx| async move {
            let zero = [0; 4096];
            let mut count = count as usize;
            while count > 0 {
                let blen = count.min(8192);
                let mut data = file
                    .read_bytes(blen)
                    .await
                    .map_err(std::io::Error::other)?;
                if data.is_empty() {
                    // cop out. if the file got truncated, just
                    // return zero bytes instead of file content.
                    let n = count.min(zero.len());
                    data = Bytes::copy_from_slice(&zero[..n]);
                }
                if data.len() > count {
                    data = data.slice(..count);
                }
                count -= data.len();
                tx.send(data).await;
            }
            Ok::<(), std::io::Error>(())
        }));

        Ok(res)
    }

    pub(crate) async fn handle_dirlist(
        self,
        _req: &Request<()>,
        path: DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // This is a directory. If the path doesn't end in "/", send a
        // redirect. Most webdav clients handle redirects really badly,
        // but a client asking for a directory index is usually a browser.
        if !path.is_collection() {
            let mut path = path.clone();
            path.add_slash();
            res.headers_mut()
                .insert("location", path.as_url_string_with_prefix().parse().unwrap());
            res.headers_mut().typed_insert(headers::ContentLength(0));
            *res.status_mut() = StatusCode::FOUND;
            return Ok(res);
        }

        // read the directory or bail.
        let mut entries = self.fs.read_dir(&path).await?;

        // start output.
        res.headers_mut()
            .insert("content-type", "text/html; charset=utf-8".parse().unwrap());
        *res.status_mut() = StatusCode::OK;
        if head {
            return Ok(res);
        }

        // now just loop and send data.
        *res.body_mut() = Body::from(AsyncStream::new(|mut tx| async move {
            // transform all entries into a dirent struct.
            struct Dirent {
                path: String,
                name: String,
                meta: Box<dyn DavMetaData>,
            }

            let mut dirents: Vec<Dirent> = Vec::new();
            while let Some(dirent) = entries.next().await {
                let mut name = dirent.name();
                if name.starts_with(b".") {
                    continue;
                }
                let mut npath = path.clone();
                npath.push_segment(&name);
                if let Ok(meta) = dirent.metadata().await {
                    if meta.is_dir() {
                        name.push(b'/');
                        npath.add_slash();
                    }
                    dirents.push(Dirent {
                        path: npath.as_url_string_with_prefix(),
                        name: String::from_utf8_lossy(&name).to_string(),
                        meta,
                    });
                }
            }

            // now we can sort the dirent struct.
            dirents.sort_by(|a, b| {
                let adir = a.meta.is_dir();
                let bdir = b.meta.is_dir();
                if adir && !bdir {
                    Ordering::Less
                } else if bdir && !adir {
                    Ordering::Greater
                } else {
                    (a.name).cmp(&b.name)
                }
            });

            // and output html.
            let upath = htmlescape::encode_minimal(&path.as_url_string_with_prefix());
            let mut w = String::new();
            w.push_str("<html><head>");
            w.push_str(&format!("<title>Index of {}</title>", upath));
            w.push_str("<style>");
            w.push_str("table { border-collapse: separate; border-spacing: 1.5em 0.25em; }");
            w.push_str("h1 { padding-left: 0.3em; }");
            w.push_str(".mono { font-family: monospace; }");
            w.push_str("</style>");
            w.push_str("</head>");
            w.push_str("<body>");
            w.push_str(&format!("<h1>Index of {}</h1>", upath));
            w.push_str("<table>");
            w.push_str("<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>");
            w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td class=\"mono\" align=\"right\">[DIR]</td></tr>");
            tx.send(Bytes::from(w)).await;

            for dirent in &dirents {
                let modified = match dirent.meta.modified() {
                    Ok(t) => {
                        let secs = t
                            .duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.as_secs() as i64)
                            .unwrap_or(0);
                        chrono::DateTime::from_timestamp(secs, 0)
                            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_default()
                    },
                    Err(_) => "".to_string(),
                };
                let size = match dirent.meta.is_file() {
                    true => dirent.meta.len().to_string(),
                    false => "[DIR]".to_string(),
                };
                let name = htmlescape::encode_minimal(&dirent.name);
                let s = format!(
                    "<tr><td><a href=\"{}\">{}</a></td><td class=\"mono\">{}</td><td class=\"mono\" align=\"right\">{}</td></tr>",
                    dirent.path, name, modified, size
                );
                tx.send(Bytes::from(s)).await;
            }

            let mut w = String::new();
            w.push_str("<tr><th colspan=\"3\"><hr></th></tr>");
            w.push_str("</table>");
            w.push_str(&format!("<address>{}</address>", crate::davhandler::SERVER_DESCRIPTOR));
            w.push_str("</body></html>");
            tx.send(Bytes::from(w)).await;

            Ok::<_, std::io::Error>(())
        }));

        Ok(res)
    }
}
