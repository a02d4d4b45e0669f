//! CAS 2.0 `serviceResponse` interpretation.
//!
//! Tag names are reduced to their lower-cased local name and character
//! content is trimmed with whitespace runs collapsed, so
//! `<cas:authenticationSuccess>` is matched as `authenticationsuccess`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Failure code CAS uses for expired, unknown or already-used tickets.
pub const INVALID_TICKET: &str = "INVALID_TICKET";

/// An attribute released by the CAS server. Repeated attribute elements
/// become `Multiple`, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AttributeValue {
    /// First (or only) value.
    pub fn first(&self) -> Option<&str> {
        match self {
            AttributeValue::Single(s) => Some(s.as_str()),
            AttributeValue::Multiple(v) => v.first().map(|s| s.as_str()),
        }
    }

    /// All values, in document order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            AttributeValue::Single(s) => vec![s.as_str()],
            AttributeValue::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            AttributeValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = AttributeValue::Multiple(vec![first, value]);
            }
            AttributeValue::Multiple(v) => v.push(value),
        }
    }
}

/// Attribute name -> value(s).
pub type Attributes = HashMap<String, AttributeValue>;

/// Identity data carried by an `authenticationSuccess` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasProfile {
    /// Content of the `<cas:user>` element, if present.
    pub user: Option<String>,
    /// Children of `<cas:attributes>`, keyed by normalized tag name.
    pub attributes: Attributes,
}

impl CasProfile {
    /// Look up an attribute by its normalized (lower-case) name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(&name.to_lowercase())
    }
}

/// The `code` attribute of an `authenticationFailure` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCode {
    InvalidTicket,
    Other(String),
}

impl FailureCode {
    pub fn from_code(code: &str) -> Self {
        if code == INVALID_TICKET {
            FailureCode::InvalidTicket
        } else {
            FailureCode::Other(code.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FailureCode::InvalidTicket => INVALID_TICKET,
            FailureCode::Other(code) => code,
        }
    }

    /// User-facing message reported with the 401.
    pub fn message(&self) -> &'static str {
        match self {
            FailureCode::InvalidTicket => "Authentication timed out",
            FailureCode::Other(_) => "Authentication failed",
        }
    }
}

/// Result of interpreting one validation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Success(CasProfile),
    Failure {
        code: FailureCode,
        raw_message: String,
    },
    Malformed {
        detail: String,
    },
}

/// Interpret a raw validation response body.
///
/// Never fails: XML errors and unexpected documents become
/// [`ValidationOutcome::Malformed`]. A failure element wins over a success
/// element when both are present.
pub fn parse(raw: &str) -> ValidationOutcome {
    let root = match parse_document(raw) {
        Ok(root) => root,
        Err(detail) => {
            warn!(error = %detail, "Failed to parse CAS validation response");
            return ValidationOutcome::Malformed {
                detail: format!("invalid XML: {}", detail),
            };
        }
    };

    if root.name != "serviceresponse" {
        return ValidationOutcome::Malformed {
            detail: format!(
                "expected <serviceResponse> root element, found <{}>",
                root.name
            ),
        };
    }

    if let Some(failure) = root.child("authenticationfailure") {
        let code = FailureCode::from_code(failure.attribute("code").unwrap_or_default());
        debug!(code = %code.as_str(), "CAS reported authentication failure");
        return ValidationOutcome::Failure {
            code,
            raw_message: failure.text_content(),
        };
    }

    if let Some(success) = root.child("authenticationsuccess") {
        let user = success
            .child("user")
            .map(|u| u.text_content())
            .filter(|u| !u.is_empty());

        let mut attributes = Attributes::new();
        if let Some(attrs) = success.child("attributes") {
            for attr in &attrs.children {
                let value = attr.text_content();
                match attributes.get_mut(&attr.name) {
                    Some(existing) => existing.push(value),
                    None => {
                        attributes.insert(attr.name.clone(), AttributeValue::Single(value));
                    }
                }
            }
        }

        return ValidationOutcome::Success(CasProfile { user, attributes });
    }

    ValidationOutcome::Malformed {
        detail: "<serviceResponse> contains neither authenticationSuccess nor authenticationFailure"
            .to_string(),
    }
}

/// Minimal element tree with normalized names.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Own text followed by descendant text, space separated.
    fn text_content(&self) -> String {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(self.text.clone());
        }
        for child in &self.children {
            let text = child.text_content();
            if !text.is_empty() {
                parts.push(text);
            }
        }
        parts.join(" ")
    }
}

fn parse_document(raw: &str) -> Result<Element, String> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open_element(&start)?),
            Ok(Event::Empty(start)) => {
                let element = open_element(&start)?;
                close_element(element, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "closing tag without matching opening tag".to_string())?;
                close_element(element, &mut stack, &mut root)?;
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                append_text(&mut stack, &text);
            }
            Ok(Event::CData(data)) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append_text(&mut stack, &text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "{} (at byte {})",
                    e,
                    reader.buffer_position()
                ))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("document ended inside <{}>", open.name));
    }

    root.ok_or_else(|| "document has no root element".to_string())
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, String> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).to_lowercase();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn close_element(
    mut element: Element,
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
) -> Result<(), String> {
    element.text = collapse_whitespace(&element.text);

    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => return Err("multiple root elements".to_string()),
        None => *root = Some(element),
    }

    Ok(())
}

fn append_text(stack: &mut [Element], text: &str) {
    // Text outside the root element carries nothing.
    if let Some(current) = stack.last_mut() {
        if !current.text.is_empty() {
            current.text.push(' ');
        }
        current.text.push_str(text);
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
