//! Tree payload codec: the XML document inside a KDBX container.
//!
//! Reading builds a small element tree first and then walks it depth-first
//! in document order, which is the order protected values were encrypted
//! in. Writing emits elements in that same order.

pub mod reader;
pub mod writer;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use uuid::Uuid;

use crate::errors::{PayloadError, Result};

pub use reader::{read_document, ParsedDocument};
pub use writer::{write_document, BinaryPool};

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
const SECONDS_TO_UNIX_EPOCH: i64 = 62_135_596_800;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn xml_error(e: impl std::fmt::Display) -> PayloadError {
    PayloadError::Xml(e.to_string())
}

/// Parse a whole document into an element tree.
pub(crate) fn parse_document(xml: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut document: Option<Element> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_error)?;
        match event {
            Event::Start(e) => {
                stack.push(start_element(&e)?);
            }
            Event::Empty(e) => {
                let element = start_element(&e)?;
                attach(&mut stack, &mut document, element);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| xml_error("unbalanced end tag"))?;
                attach(&mut stack, &mut document, element);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(xml_error("unexpected end of document").into());
    }
    document.ok_or_else(|| PayloadError::NoDocumentElement.into())
}

fn start_element(e: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let mut element = Element {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..Element::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], document: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if document.is_none() {
                *document = Some(element);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

pub(crate) fn parse_bool(element: &Element) -> Result<bool> {
    let text = element.text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("false") {
        Ok(false)
    } else if text.eq_ignore_ascii_case("true") {
        Ok(true)
    } else {
        Err(PayloadError::InvalidBool {
            element: element.name.clone(),
            value: text.to_string(),
        }
        .into())
    }
}

/// `null` (or empty) means inherit from the parent.
pub(crate) fn parse_tri_state(element: &Element) -> Result<Option<bool>> {
    let text = element.text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        Ok(None)
    } else {
        parse_bool(element).map(Some)
    }
}

pub(crate) fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

pub(crate) fn format_tri_state(value: Option<bool>) -> &'static str {
    match value {
        None => "null",
        Some(v) => format_bool(v),
    }
}

pub(crate) fn parse_number<T: std::str::FromStr>(element: &Element) -> Result<T> {
    element.text.trim().parse().map_err(|_| {
        PayloadError::InvalidNumber {
            element: element.name.clone(),
            value: element.text.trim().to_string(),
        }
        .into()
    })
}

pub(crate) fn parse_icon(element: &Element) -> Result<u32> {
    let value: i64 = parse_number(element)?;
    u32::try_from(value).map_err(|_| {
        PayloadError::InvalidIcon {
            element: element.name.clone(),
            value,
        }
        .into()
    })
}

/// `#RRGGBB` or empty for "no colour".
pub(crate) fn parse_color(element: &Element) -> Result<Option<String>> {
    let text = element.text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let valid = text.len() == 7
        && text.starts_with('#')
        && text[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(PayloadError::InvalidColor {
            element: element.name.clone(),
            value: text.to_string(),
        }
        .into());
    }
    Ok(Some(text.to_string()))
}

pub(crate) fn parse_base64(element: &Element) -> Result<Vec<u8>> {
    BASE64
        .decode(element.text.trim())
        .map_err(|_| PayloadError::InvalidBase64(element.name.clone()).into())
}

/// A UUID literal; the all-zero UUID and empty text read as `None`.
pub(crate) fn parse_uuid(element: &Element) -> Result<Option<Uuid>> {
    if element.text.trim().is_empty() {
        return Ok(None);
    }
    let bytes = BASE64
        .decode(element.text.trim())
        .map_err(|_| PayloadError::InvalidUuid(element.name.clone()))?;
    let uuid = Uuid::from_slice(&bytes).map_err(|_| PayloadError::InvalidUuid(element.name.clone()))?;
    Ok((!uuid.is_nil()).then_some(uuid))
}

pub(crate) fn format_uuid(uuid: Option<Uuid>) -> String {
    BASE64.encode(uuid.unwrap_or_else(Uuid::nil).as_bytes())
}

/// Accepts both the ISO 8601 text form and the base64 binary form.
pub(crate) fn parse_time(element: &Element) -> Result<DateTime<Utc>> {
    let text = element.text.trim();
    let invalid = || PayloadError::InvalidDateTime {
        element: element.name.clone(),
        value: text.to_string(),
    };

    if text.contains('-') && text.contains(':') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    let bytes = BASE64.decode(text).map_err(|_| invalid())?;
    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| invalid())?;
    let seconds = i64::from_le_bytes(raw)
        .checked_sub(SECONDS_TO_UNIX_EPOCH)
        .ok_or_else(invalid)?;
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| invalid().into())
}

pub(crate) fn format_time(time: &DateTime<Utc>, binary: bool) -> String {
    if binary {
        let seconds = time.timestamp() + SECONDS_TO_UNIX_EPOCH;
        BASE64.encode(seconds.to_le_bytes())
    } else {
        time.format(ISO_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str, text: &str) -> Element {
        Element {
            name: name.into(),
            text: text.into(),
            ..Element::default()
        }
    }

    #[test]
    fn parses_nested_document() {
        let doc = parse_document(
            b"<?xml version=\"1.0\"?><A x=\"1\"><B>t&amp;t</B><C/><B>two</B></A>",
        )
        .unwrap();
        assert_eq!(doc.name, "A");
        assert_eq!(doc.attr("x"), Some("1"));
        assert_eq!(doc.child("B").unwrap().text, "t&t");
        assert_eq!(doc.children_named("B").count(), 2);
        assert!(doc.child("C").is_some());
    }

    #[test]
    fn malformed_document_is_xml_error() {
        assert!(matches!(
            parse_document(b"<A><B></A>"),
            Err(crate::errors::KdbxError::Payload(PayloadError::Xml(_)))
        ));
        assert!(matches!(
            parse_document(b""),
            Err(crate::errors::KdbxError::Payload(PayloadError::NoDocumentElement))
        ));
    }

    #[test]
    fn bool_literals() {
        assert!(parse_bool(&element("Expires", "TRUE")).unwrap());
        assert!(!parse_bool(&element("Expires", "false")).unwrap());
        assert!(!parse_bool(&element("Expires", "")).unwrap());
        assert!(parse_bool(&element("Expires", "yes")).is_err());
        assert_eq!(parse_tri_state(&element("EnableAutoType", "null")).unwrap(), None);
        assert_eq!(
            parse_tri_state(&element("EnableAutoType", "True")).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn both_time_forms_parse_to_the_same_instant() {
        let t = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 15).unwrap();
        let iso = format_time(&t, false);
        let bin = format_time(&t, true);
        assert_eq!(iso, "2024-05-17T08:30:15Z");
        assert_eq!(parse_time(&element("T", &iso)).unwrap(), t);
        assert_eq!(parse_time(&element("T", &bin)).unwrap(), t);
        assert!(parse_time(&element("T", "garbage")).is_err());
    }

    #[test]
    fn colour_and_uuid_literals() {
        assert_eq!(
            parse_color(&element("ForegroundColor", "#FF00aa")).unwrap(),
            Some("#FF00aa".to_string())
        );
        assert_eq!(parse_color(&element("ForegroundColor", "")).unwrap(), None);
        assert!(parse_color(&element("ForegroundColor", "red")).is_err());

        let id = Uuid::new_v4();
        assert_eq!(
            parse_uuid(&element("UUID", &format_uuid(Some(id)))).unwrap(),
            Some(id)
        );
        assert_eq!(parse_uuid(&element("UUID", &format_uuid(None))).unwrap(), None);
        assert!(parse_uuid(&element("UUID", "AAAA")).is_err());
    }

    #[test]
    fn negative_icon_is_rejected() {
        assert!(matches!(
            parse_icon(&element("IconID", "-1")),
            Err(crate::errors::KdbxError::Payload(PayloadError::InvalidIcon { value: -1, .. }))
        ));
        assert_eq!(parse_icon(&element("IconID", "12")).unwrap(), 12);
    }
}
