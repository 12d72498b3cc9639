//! Small extensions to `xmltree::Element`, so that building and
//! streaming DAV: XML stays terse in the handlers.
use std::io::{Read, Write};

use xml::EmitterConfig;
use xml::common::XmlVersion;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;
use xmltree::{Element, XMLNode};

use crate::{DavError, DavResult};

pub(crate) trait ElementExt {
    fn new2<'a, E: Into<&'a str>>(e: E) -> Self;
    fn new_text<'a, E: Into<&'a str>, T: Into<String>>(e: E, t: T) -> Self;
    fn ns<S: Into<String>>(self, prefix: S, namespace: S) -> Self;
    fn text<T: Into<String>>(self, t: T) -> Self;
    fn push(&mut self, e: Element);
    fn parse2<R: Read>(r: R) -> Result<Element, DavError>;
    fn has_child_elems(&self) -> bool;
    fn child_elems_iter(&self) -> impl Iterator<Item = &Element>;
    fn child_elems_into_iter(self) -> impl Iterator<Item = Element>;
    fn take_child_elems(self) -> Vec<Element>;
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
}

impl ElementExt for Element {
    // Element::new() with a "prefix:name" shorthand.
    fn new2<'a, N: Into<&'a str>>(n: N) -> Element {
        let v: Vec<&str> = n.into().splitn(2, ':').collect();
        if v.len() == 1 {
            Element::new(v[0])
        } else {
            let mut e = Element::new(v[1]);
            e.prefix = Some(v[0].to_string());
            e
        }
    }

    fn new_text<'a, N: Into<&'a str>, S: Into<String>>(n: N, t: S) -> Element {
        Element::new2(n).text(t)
    }

    fn ns<S: Into<String>>(mut self, prefix: S, namespace: S) -> Element {
        let mut ns = self.namespaces.unwrap_or_else(xmltree::Namespace::empty);
        ns.force_put(prefix.into(), namespace.into());
        self.namespaces = Some(ns);
        self
    }

    fn text<S: Into<String>>(mut self, t: S) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn push(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn parse2<R: Read>(r: R) -> Result<Element, DavError> {
        match Element::parse(r) {
            Ok(elem) => Ok(elem),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn has_child_elems(&self) -> bool {
        self.children
            .iter()
            .any(|n| matches!(n, XMLNode::Element(_)))
    }

    fn child_elems_iter(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        })
    }

    fn child_elems_into_iter(self) -> impl Iterator<Item = Element> {
        self.children.into_iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        })
    }

    fn take_child_elems(self) -> Vec<Element> {
        self.child_elems_into_iter().collect()
    }

    // Stream the element through an EventWriter. Namespace
    // declarations are taken from self.namespaces; prefixed names are
    // written as-is, relying on a declaration on this element or an
    // ancestor.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let name = match self.prefix {
            Some(ref p) => format!("{}:{}", p, self.name),
            None => self.name.clone(),
        };
        let mut ev = XmlWEvent::start_element(name.as_str());
        if let Some(ref ns) = self.namespaces {
            for (prefix, uri) in &ns.0 {
                ev = ev.ns(prefix.as_str(), uri.as_str());
            }
        }
        for (k, v) in &self.attributes {
            ev = ev.attr(k.as_str(), v.as_str());
        }
        emitter.write(ev)?;
        for child in &self.children {
            match child {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
                XMLNode::CData(t) => emitter.write(XmlWEvent::cdata(t))?,
                _ => {},
            }
        }
        emitter.write(XmlWEvent::end_element())
    }
}

pub(crate) fn emitter<W: Write>(w: W) -> DavResult<EventWriter<W>> {
    let mut emitter = EventWriter::new_with_config(
        w,
        EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            ..Default::default()
        },
    );
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

// Serialize one element to a standalone XML fragment (no declaration).
pub(crate) fn element_to_bytes(elem: &Element) -> DavResult<Vec<u8>> {
    let mut emitter = EventWriter::new_with_config(
        Vec::new(),
        EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            write_document_declaration: false,
            ..Default::default()
        },
    );
    elem.write_ev(&mut emitter)?;
    Ok(emitter.into_inner())
}
