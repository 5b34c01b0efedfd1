//! XML canonicalization of element subtrees.
//!
//! Covers Canonical XML 1.0 and 1.1 and Exclusive XML Canonicalization,
//! each with and without comments, for the case XML signatures need: one
//! element and all of its descendants. The subtree is given as the path
//! from the document root, since inclusive canonicalization pulls in
//! namespace declarations and `xml:*` attributes from ancestors.
//!
//! Canonical XML 1.1 `xml:base` fix-up is not performed; `xml:base` is
//! simply not inherited under 1.1.

use std::collections::BTreeMap;

use crate::domain::xml::{XmlAttribute, XmlElement, XmlNode};
use crate::infra::error::TrustError;

pub const C14N_10: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_10_COMMENTS: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const C14N_11: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const C14N_11_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Inclusive10,
    Inclusive11,
    Exclusive,
}

/// A canonicalization algorithm with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalizer {
    variant: Variant,
    with_comments: bool,
    /// `InclusiveNamespaces PrefixList` of exclusive c14n; `""` is the
    /// default namespace.
    inclusive_prefixes: Vec<String>,
}

impl Default for Canonicalizer {
    /// Canonical XML 1.0 without comments, the XML-DSig default.
    fn default() -> Self {
        Self {
            variant: Variant::Inclusive10,
            with_comments: false,
            inclusive_prefixes: Vec::new(),
        }
    }
}

impl Canonicalizer {
    /// Looks up an algorithm URI. `method` is the `CanonicalizationMethod`
    /// or `Transform` element, read for an `InclusiveNamespaces` child.
    pub fn from_uri(uri: &str, method: Option<&XmlElement>) -> Result<Self, TrustError> {
        let (variant, with_comments) = match uri {
            C14N_10 => (Variant::Inclusive10, false),
            C14N_10_COMMENTS => (Variant::Inclusive10, true),
            C14N_11 => (Variant::Inclusive11, false),
            C14N_11_COMMENTS => (Variant::Inclusive11, true),
            EXC_C14N => (Variant::Exclusive, false),
            EXC_C14N_COMMENTS => (Variant::Exclusive, true),
            other => return Err(TrustError::UnsupportedAlgorithm(other.to_string())),
        };
        let prefix_list = method.and_then(|m| m.child("InclusiveNamespaces"));
        let inclusive_prefixes = match (variant, prefix_list) {
            (Variant::Exclusive, Some(list)) => list
                .attr("PrefixList")
                .unwrap_or_default()
                .split_whitespace()
                .map(|p| if p == "#default" { String::new() } else { p.to_string() })
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            variant,
            with_comments,
            inclusive_prefixes,
        })
    }

    #[must_use]
    pub fn is_canonicalization(uri: &str) -> bool {
        Self::from_uri(uri, None).is_ok()
    }

    #[must_use]
    pub fn without_comments(mut self) -> Self {
        self.with_comments = false;
        self
    }

    /// Canonical form of the last element of `path`. `skip` names one
    /// descendant left out entirely (the enveloped signature).
    pub fn canonicalize(
        &self,
        path: &[&XmlElement],
        skip: Option<&XmlElement>,
    ) -> Result<Vec<u8>, TrustError> {
        let Some((apex, ancestors)) = path.split_last() else {
            return Err(TrustError::MalformedSignature(
                "nothing to canonicalize".to_string(),
            ));
        };

        let mut scope = Scope::default();
        for ancestor in ancestors {
            scope = scope.enter(ancestor);
        }
        let inherited = match self.variant {
            Variant::Exclusive => Vec::new(),
            Variant::Inclusive10 => inherited_xml_attributes(ancestors, &["lang", "space", "base"]),
            Variant::Inclusive11 => inherited_xml_attributes(ancestors, &["lang", "space"]),
        };

        let mut out = String::new();
        let writer = Writer {
            canonicalizer: self,
            skip,
        };
        writer.element(apex, &scope, &BTreeMap::new(), &inherited, &mut out)?;
        Ok(out.into_bytes())
    }
}

/// In-scope namespace bindings.
#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: BTreeMap<String, String>,
}

impl Scope {
    fn enter(&self, element: &XmlElement) -> Scope {
        let mut bindings = self.bindings.clone();
        for (prefix, uri) in &element.namespaces {
            bindings.insert(prefix.clone(), uri.clone());
        }
        Scope { bindings }
    }

    fn uri(&self, prefix: &str) -> &str {
        if prefix == "xml" {
            return XML_NAMESPACE;
        }
        self.bindings.get(prefix).map_or("", String::as_str)
    }
}

/// Nearest ancestor value for each `xml:*` attribute in `names`.
fn inherited_xml_attributes(ancestors: &[&XmlElement], names: &[&str]) -> Vec<XmlAttribute> {
    let mut found: BTreeMap<&str, &XmlAttribute> = BTreeMap::new();
    for ancestor in ancestors {
        for attr in &ancestor.attributes {
            if attr.prefix.as_deref() == Some("xml") && names.contains(&attr.local.as_str()) {
                found.insert(attr.local.as_str(), attr);
            }
        }
    }
    found.into_values().cloned().collect()
}

struct Writer<'a> {
    canonicalizer: &'a Canonicalizer,
    skip: Option<&'a XmlElement>,
}

impl Writer<'_> {
    fn element(
        &self,
        element: &XmlElement,
        parent_scope: &Scope,
        rendered: &BTreeMap<String, String>,
        inherited: &[XmlAttribute],
        out: &mut String,
    ) -> Result<(), TrustError> {
        let scope = parent_scope.enter(element);
        let declarations = self.namespace_declarations(element, &scope, rendered);
        let mut rendered = rendered.clone();
        for (prefix, uri) in &declarations {
            rendered.insert(prefix.clone(), uri.clone());
        }

        let name = element.qualified_name();
        out.push('<');
        out.push_str(&name);
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                out.push_str(" xmlns:");
                out.push_str(prefix);
                out.push_str("=\"");
            }
            escape_attribute(uri, out);
            out.push('"');
        }

        let mut attributes: Vec<(&str, &XmlAttribute)> = Vec::new();
        for attr in &element.attributes {
            let uri = match attr.prefix.as_deref() {
                Some(prefix) => scope.uri(prefix),
                None => "",
            };
            if attr.prefix.is_some() && uri.is_empty() {
                return Err(TrustError::MalformedSignature(format!(
                    "undeclared prefix on attribute {}",
                    attr.qualified_name()
                )));
            }
            attributes.push((uri, attr));
        }
        for attr in inherited {
            if !element
                .attributes
                .iter()
                .any(|a| a.prefix == attr.prefix && a.local == attr.local)
            {
                attributes.push((XML_NAMESPACE, attr));
            }
        }
        attributes.sort_by(|(ua, a), (ub, b)| (*ua, &a.local).cmp(&(*ub, &b.local)));
        for (_, attr) in attributes {
            out.push(' ');
            out.push_str(&attr.qualified_name());
            out.push_str("=\"");
            escape_attribute(&attr.value, out);
            out.push('"');
        }
        out.push('>');

        for node in &element.content {
            match node {
                XmlNode::Text(text) => escape_text(text, out),
                XmlNode::Element(index) => {
                    let Some(child) = element.children.get(*index) else {
                        continue;
                    };
                    if self.skip.is_some_and(|skip| std::ptr::eq(skip, child)) {
                        continue;
                    }
                    self.element(child, &scope, &rendered, &[], out)?;
                }
                XmlNode::Instruction(body) => {
                    out.push_str("<?");
                    out.push_str(body);
                    out.push_str("?>");
                }
                XmlNode::Comment(body) => {
                    if self.canonicalizer.with_comments {
                        out.push_str("<!--");
                        out.push_str(body);
                        out.push_str("-->");
                    }
                }
            }
        }

        out.push_str("</");
        out.push_str(&name);
        out.push('>');
        Ok(())
    }

    /// Namespace declarations to emit on `element`, sorted by prefix with
    /// the default namespace first.
    fn namespace_declarations(
        &self,
        element: &XmlElement,
        scope: &Scope,
        rendered: &BTreeMap<String, String>,
    ) -> Vec<(String, String)> {
        let candidates: Vec<String> = match self.canonicalizer.variant {
            Variant::Inclusive10 | Variant::Inclusive11 => {
                let mut all: Vec<String> = scope.bindings.keys().cloned().collect();
                if !all.iter().any(String::is_empty) {
                    all.push(String::new());
                }
                all
            }
            Variant::Exclusive => {
                let mut used = vec![element.prefix.clone().unwrap_or_default()];
                used.extend(element.attributes.iter().filter_map(|a| a.prefix.clone()));
                used.extend(
                    self.canonicalizer
                        .inclusive_prefixes
                        .iter()
                        .filter(|p| p.is_empty() || scope.bindings.contains_key(*p))
                        .cloned(),
                );
                used
            }
        };

        let mut declarations: BTreeMap<String, String> = BTreeMap::new();
        for prefix in candidates {
            if prefix == "xml" {
                continue;
            }
            let uri = scope.uri(&prefix).to_string();
            let already = rendered.get(&prefix).map_or("", String::as_str);
            let emit = if prefix.is_empty() {
                uri != already
            } else {
                !uri.is_empty() && rendered.get(&prefix) != Some(&uri)
            };
            if emit {
                declarations.insert(prefix, uri);
            }
        }
        declarations.into_iter().collect()
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}
