//! Minimal in-memory XML element tree, used as the substrate the rest of
//! this crate's parsers query with XPath-shaped navigation
//! (`Prerequisites` children, `Files/File`, ...).
//!
//! We deliberately do not pull in a general-purpose DOM crate: the
//! fragments this system parses are small (one update's metadata), and
//! a hand-rolled tree keeps namespace-prefix handling (we only ever
//! need the *local* name, except for the one `xsi:type` attribute we
//! match verbatim) under our control.

use quick_xml::Reader;
use quick_xml::events::Event;
use wsync_error::WsyncError;

/// One XML element: its local name, its attributes (qualified name as
/// given in the document, unmodified), direct text content, and child
/// elements in document order.
#[derive(Debug, Clone, Default)]
pub struct XNode {
    /// Local name (namespace prefix, if any, stripped).
    pub name: String,
    /// Attributes as `(qualified_name, value)`, in document order.
    pub attrs: Vec<(String, String)>,
    /// Concatenated text directly inside this element (trimmed).
    pub text: String,
    /// Child elements, in document order.
    pub children: Vec<XNode>,
}

impl XNode {
    /// Returns the value of the first attribute whose qualified name
    /// equals `name` exactly (e.g. `"xsi:type"` or `"UpdateID"`).
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns all direct children whose local name equals `name`.
    pub fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a XNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Returns the first direct child whose local name equals `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Serialize this node (and its subtree) back to a canonical XML
    /// string. Used to store opaque sub-trees (applicability rules,
    /// handler-specific data) without interpreting them further.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v));
            out.push('"');
        }
        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(&self.text));
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Escape `&`, `<`, `>` and `"` for use as XML text or an attribute value.
#[must_use]
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn local_name(qname: &str) -> &str {
    qname.split(':').next_back().unwrap_or(qname)
}

/// Parse an XML fragment into its root element.
///
/// The fragment is expected to have exactly one top-level element (the
/// upstream sync endpoint always returns one update's metadata per
/// fragment). Leading/trailing whitespace and an XML declaration are
/// tolerated.
pub fn parse_root(xml: &str) -> Result<XNode, WsyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XNode> = Vec::new();
    let mut root: Option<XNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut node = XNode {
                    name: local_name(&qname).to_string(),
                    ..XNode::default()
                };
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    node.attrs.push((key, value));
                }
                stack.push(node);
            }
            Ok(Event::Empty(e)) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut node = XNode {
                    name: local_name(&qname).to_string(),
                    ..XNode::default()
                };
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    node.attrs.push((key, value));
                }
                push_finished(&mut stack, &mut root, node);
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().unwrap_or_default();
                    top.text.push_str(text.trim());
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| WsyncError::parse_error("/", "unbalanced end tag"))?;
                push_finished(&mut stack, &mut root, node);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(WsyncError::parse_error("/", e.to_string()));
            }
        }
    }

    root.ok_or_else(|| WsyncError::parse_error("/", "fragment has no root element"))
}

fn push_finished(stack: &mut Vec<XNode>, root: &mut Option<XNode>, node: XNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else {
        *root = Some(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attrs() {
        let xml = r#"<Update><UpdateIdentity UpdateID="11111111-1111-1111-1111-111111111111" RevisionNumber="3"/><Title>Example</Title></Update>"#;
        let root = parse_root(xml).unwrap();
        assert_eq!(root.name, "Update");
        let id = root.child("UpdateIdentity").unwrap();
        assert_eq!(id.attr("UpdateID"), Some("11111111-1111-1111-1111-111111111111"));
        assert_eq!(id.attr("RevisionNumber"), Some("3"));
        assert_eq!(root.child("Title").unwrap().text, "Example");
    }

    #[test]
    fn strips_namespace_prefixes_from_local_names() {
        let xml = r#"<upd:Update xmlns:upd="urn:x"><upd:Title>T</upd:Title></upd:Update>"#;
        let root = parse_root(xml).unwrap();
        assert_eq!(root.name, "Update");
        assert_eq!(root.child("Title").unwrap().text, "T");
    }

    #[test]
    fn preserves_qualified_attribute_names_verbatim() {
        let xml = r#"<HandlerSpecificData xsi:type="cat:Category"/>"#;
        let root = parse_root(xml).unwrap();
        assert_eq!(root.attr("xsi:type"), Some("cat:Category"));
    }

    #[test]
    fn round_trips_through_to_xml() {
        let xml = r#"<A x="1"><B>hi</B></A>"#;
        let root = parse_root(xml).unwrap();
        let rendered = root.to_xml();
        let reparsed = parse_root(&rendered).unwrap();
        assert_eq!(reparsed.attr("x"), Some("1"));
        assert_eq!(reparsed.child("B").unwrap().text, "hi");
    }
}
