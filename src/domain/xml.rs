//! Minimal XML element tree over `quick-xml` events.
//!
//! Lookups use namespace-local names. The tree also keeps what
//! canonicalization needs: element and attribute prefixes, namespace
//! declarations, and mixed content in document order. Line endings and
//! attribute whitespace are normalised as an XML processor would.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("XML error at byte {position}: {reason}")]
pub struct XmlError {
    pub position: u64,
    pub reason: String,
}

/// Non-namespace attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub prefix: Option<String>,
    pub local: String,
    pub value: String,
}

impl XmlAttribute {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified(self.prefix.as_deref(), &self.local)
    }
}

/// Content node of an element, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Text(String),
    /// Index into [`XmlElement::children`].
    Element(usize),
    /// Processing instruction body, between `<?` and `?>`.
    Instruction(String),
    Comment(String),
}

/// One element with its attributes, content and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub prefix: Option<String>,
    /// Declarations made on this element; `""` is the default namespace.
    pub namespaces: Vec<(String, String)>,
    pub attributes: Vec<XmlAttribute>,
    pub content: Vec<XmlNode>,
    pub children: Vec<XmlElement>,
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

fn split_name(raw: &[u8]) -> (Option<String>, String) {
    let name = String::from_utf8_lossy(raw);
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.into_owned()),
    }
}

/// XML 1.0 end-of-line handling: `\r\n` and lone `\r` become `\n`.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn decode_text(raw: &[u8]) -> Result<String, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
    let text = normalize_newlines(text);
    Ok(unescape(&text).map_err(|e| e.to_string())?.into_owned())
}

/// Attribute-value normalisation for CDATA attributes: literal whitespace
/// becomes a space, character references are kept.
fn decode_attribute(raw: &[u8]) -> Result<String, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
    let text = normalize_newlines(text).replace(['\t', '\n'], " ");
    Ok(unescape(&text).map_err(|e| e.to_string())?.into_owned())
}

impl XmlElement {
    /// Parses a document and returns its root element.
    pub fn parse(source: &[u8]) -> Result<XmlElement, XmlError> {
        let mut reader = Reader::from_reader(source);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let start = reader.buffer_position();
            let err = |reason: String| XmlError {
                position: start,
                reason,
            };
            let event = reader.read_event().map_err(|e| err(e.to_string()))?;
            match event {
                Event::Start(e) => {
                    stack.push(Self::open(&e).map_err(err)?);
                }
                Event::Empty(e) => {
                    let element = Self::open(&e).map_err(err)?;
                    Self::attach(&mut stack, &mut root, element).map_err(err)?;
                }
                Event::End(e) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| err("unexpected end tag".to_string()))?;
                    let (prefix, name) = split_name(e.name().as_ref());
                    if prefix != element.prefix || name != element.name {
                        return Err(err(format!(
                            "end tag {} does not match {}",
                            qualified(prefix.as_deref(), &name),
                            element.qualified_name()
                        )));
                    }
                    Self::attach(&mut stack, &mut root, element).map_err(err)?;
                }
                Event::Text(t) => {
                    if let Some(current) = stack.last_mut() {
                        current.push_text(decode_text(&t).map_err(err)?);
                    } else if !t.iter().all(u8::is_ascii_whitespace) {
                        return Err(err("text outside of root element".to_string()));
                    }
                }
                Event::CData(c) => {
                    if let Some(current) = stack.last_mut() {
                        let text = std::str::from_utf8(&c).map_err(|e| err(e.to_string()))?;
                        current.push_text(normalize_newlines(text));
                    }
                }
                Event::PI(pi) => {
                    if let Some(current) = stack.last_mut() {
                        let body = String::from_utf8_lossy(&pi).into_owned();
                        current.content.push(XmlNode::Instruction(body));
                    }
                }
                Event::Comment(c) => {
                    if let Some(current) = stack.last_mut() {
                        let body = normalize_newlines(&String::from_utf8_lossy(&c));
                        current.content.push(XmlNode::Comment(body));
                    }
                }
                Event::Eof => break,
                Event::Decl(_) | Event::DocType(_) => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError {
                position: reader.buffer_position(),
                reason: "unclosed element".to_string(),
            });
        }
        root.ok_or(XmlError {
            position: 0,
            reason: "document has no root element".to_string(),
        })
    }

    fn open(start: &BytesStart<'_>) -> Result<XmlElement, String> {
        let (prefix, name) = split_name(start.name().as_ref());
        let mut namespaces = Vec::new();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let value = decode_attribute(&attr.value)?;
            match split_name(attr.key.as_ref()) {
                (None, local) if local == "xmlns" => namespaces.push((String::new(), value)),
                (Some(p), local) if p == "xmlns" => namespaces.push((local, value)),
                (prefix, local) => attributes.push(XmlAttribute {
                    prefix,
                    local,
                    value,
                }),
            }
        }
        Ok(XmlElement {
            name,
            prefix,
            namespaces,
            attributes,
            content: Vec::new(),
            children: Vec::new(),
        })
    }

    fn push_text(&mut self, text: String) {
        if let Some(XmlNode::Text(last)) = self.content.last_mut() {
            last.push_str(&text);
        } else {
            self.content.push(XmlNode::Text(text));
        }
    }

    fn attach(
        stack: &mut [XmlElement],
        root: &mut Option<XmlElement>,
        element: XmlElement,
    ) -> Result<(), String> {
        match stack.last_mut() {
            Some(parent) => {
                parent.content.push(XmlNode::Element(parent.children.len()));
                parent.children.push(element);
            }
            None if root.is_none() => *root = Some(element),
            None => return Err("multiple root elements".to_string()),
        }
        Ok(())
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified(self.prefix.as_deref(), &self.name)
    }

    /// Attribute value by local name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local == name)
            .map(|a| a.value.as_str())
    }

    /// Trimmed direct text content.
    #[must_use]
    pub fn text(&self) -> &str {
        self.content
            .iter()
            .find_map(|node| match node {
                XmlNode::Text(t) if !t.trim().is_empty() => Some(t.trim()),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First descendant (or self) with the given local name, depth first.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// All descendants (and self) with the given local name, document order.
    #[must_use]
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect(&|e| e.name == name, &mut found);
        found
    }

    fn collect<'a>(
        &'a self,
        matches: &dyn Fn(&XmlElement) -> bool,
        found: &mut Vec<&'a XmlElement>,
    ) {
        if matches(self) {
            found.push(self);
        }
        for child in &self.children {
            child.collect(matches, found);
        }
    }

    fn id(&self) -> Option<&str> {
        self.attr("Id").or_else(|| self.attr("id"))
    }

    /// Element whose `Id` (or `id`) attribute equals `id`.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&XmlElement> {
        self.path_by_id(id).and_then(|path| path.last().copied())
    }

    /// Path from this element down to the one carrying `Id="id"`, both ends
    /// included. `None` when the id is absent or not unique.
    #[must_use]
    pub fn path_by_id(&self, id: &str) -> Option<Vec<&XmlElement>> {
        let mut found = Vec::new();
        self.collect(&|e| e.id() == Some(id), &mut found);
        if found.len() != 1 {
            return None;
        }
        self.path_to(found[0])
    }

    /// Path to the first element with the given local name.
    #[must_use]
    pub fn path_to_first(&self, name: &str) -> Option<Vec<&XmlElement>> {
        let target = self.find(name)?;
        self.path_to(target)
    }

    fn path_to<'a>(&'a self, target: &XmlElement) -> Option<Vec<&'a XmlElement>> {
        if std::ptr::eq(self, target) {
            return Some(vec![self]);
        }
        self.children.iter().find_map(|child| {
            child.path_to(target).map(|mut path| {
                path.insert(0, self);
                path
            })
        })
    }
}
