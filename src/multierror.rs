//! Multi-resource operations (DELETE, COPY, MOVE, LOCK) report their
//! outcome through a stream of (path, status) pairs. One pair, for the
//! request path itself, collapses into a plain status response;
//! anything else becomes a streamed 207 Multi-Status body.
use std::io;

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use http::{Response, StatusCode};
use xml::EmitterConfig;
use xml::common::XmlVersion;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;

use crate::DavResult;
use crate::async_stream::{AsyncStream, Sender};
use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::MemBuffer;

type Item = (DavPath, StatusCode);

pub(crate) struct MultiError(Sender<Item, DavError>);

impl MultiError {
    pub fn new(sender: Sender<Item, DavError>) -> MultiError {
        MultiError(sender)
    }

    pub async fn add_status(
        &mut self,
        path: &DavPath,
        status: impl Into<DavError>,
    ) -> DavResult<()> {
        let status = status.into().statuscode();
        self.0.send((path.clone(), status)).await;
        Ok(())
    }
}

type XmlWriter = EventWriter<MemBuffer>;

fn write_elem(xw: &mut XmlWriter, name: &str, text: &str) -> Result<(), DavError> {
    xw.write(XmlWEvent::start_element(name))?;
    if !text.is_empty() {
        xw.write(XmlWEvent::characters(text))?;
    }
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}

fn write_response(xw: &mut XmlWriter, path: &DavPath, sc: StatusCode) -> Result<(), DavError> {
    xw.write(XmlWEvent::start_element("D:response"))?;
    write_elem(xw, "D:href", &path.as_url_string_with_prefix())?;
    write_elem(xw, "D:status", &format!("HTTP/1.1 {}", sc))?;
    xw.write(XmlWEvent::end_element())?;
    Ok(())
}

pub(crate) async fn multi_error<S>(req_path: DavPath, status_stream: S) -> DavResult<Response<Body>>
where S: Stream<Item = Result<Item, DavError>> + Send + 'static {
    // read the first path/status item
    let mut status_stream = Box::pin(status_stream);
    let (path, status) = match status_stream.next().await {
        None => return Err(DavError::ChanError),
        Some(Err(e)) => return Err(e),
        Some(Ok(item)) => item,
    };

    let mut items = Vec::new();

    if path == req_path {
        // the first item was for the request path itself.
        // see if there is a second item.
        match status_stream.next().await {
            None => {
                // no, this was the one and only outcome.
                let resp = Response::builder()
                    .status(status)
                    .header("content-length", "0")
                    .body(Body::empty())
                    .unwrap();
                return Ok(resp);
            },
            Some(Err(e)) => return Err(e),
            Some(Ok(item)) => {
                items.push(Ok((path, status)));
                items.push(Ok(item));
            },
        }
    } else {
        items.push(Ok((path, status)));
    }

    // Transform the path/status items to an XML body stream.
    let body: AsyncStream<Bytes, DavError> = AsyncStream::new(|mut tx| async move {
        let mut xw = EventWriter::new_with_config(MemBuffer::new(), EmitterConfig {
            perform_indent: true,
            ..EmitterConfig::default()
        });
        xw.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })
        .map_err(DavError::from)?;
        xw.write(XmlWEvent::start_element("D:multistatus").ns("D", "DAV:"))
            .map_err(DavError::from)?;
        tx.send(xw.inner_mut().take()).await;

        // now write the items.
        let mut status_stream = futures_util::stream::iter(items).chain(status_stream);
        while let Some(res) = status_stream.next().await {
            let (path, status) = res?;
            write_response(&mut xw, &path, status)?;
            tx.send(xw.inner_mut().take()).await;
        }

        // and finally write the trailer.
        xw.write(XmlWEvent::end_element()).map_err(DavError::from)?;
        tx.send(xw.inner_mut().take()).await;

        Ok::<(), DavError>(())
    });

    // map the DavError stream into an io::Error stream for the body.
    let body: AsyncStream<Bytes, io::Error> = AsyncStream::new(|mut tx| async move {
        let mut body = Box::pin(body);
        while let Some(res) = body.next().await {
            match res {
                Ok(bytes) => {
                    tx.send(bytes).await;
                },
                Err(e) => return Err(io::Error::from(e)),
            }
        }
        Ok::<(), io::Error>(())
    });

    let resp = Response::builder()
        .header("content-type", "application/xml; charset=utf-8")
        .status(StatusCode::MULTI_STATUS)
        .body(Body::from(body))
        .unwrap();
    Ok(resp)
}
