//! Parse, query, rewrite and re-serialize HTML content fragments.
//!
//! Stored rich-text bodies are fragments rather than documents: they carry no
//! `<html>`/`<body>` scaffolding and usually have several top-level nodes. The
//! fragment is wrapped in a synthetic container element before parsing, the
//! parsed tree is copied into an owned arena addressed by [`NodeIndex`], and
//! the container is unwrapped again by [`HtmlFragmentDocument::serialize`] so
//! it never reaches the output.

use html_escape::{encode_double_quoted_attribute, encode_text};
use scraper::{node::Node, ElementRef, Html};
use serde::Serialize;
use std::error::Error;
use std::fmt;

// This enables or disables the eprintln! macro, effectively removing it from the code when the
// "debug_logs" feature is disabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Attribute carried by the synthetic container element.
pub const CONTAINER_MARKER: &str = "data-html-fragment-wrap";

const DEFAULT_MAX_BYTES: usize = 8 * 1024 * 1024;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

const NEWLINE_EATING_ELEMENTS: &[&str] = &["pre", "textarea", "listing"];

const ROOT: NodeIndex = NodeIndex(0);

/// Stable handle to a node inside one [`HtmlFragmentDocument`].
///
/// Nodes are never removed from the arena, so a handle stays valid for the
/// lifetime of the document that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Raw arena slot.
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element name plus attributes in parser order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    name: String,
    attrs: Vec<(String, String)>,
}

impl ElementData {
    /// Lowercase local tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an attribute value by name (ASCII case-insensitive).
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Iterates attributes in parser order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Whitespace-separated tokens of the `class` attribute.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attribute("class").unwrap_or("").split_whitespace()
    }

    fn set_attribute(&mut self, name: &str, value: &str) {
        match self
            .attrs
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => {
                existing.clear();
                existing.push_str(value);
            }
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Root,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct ArenaNode {
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
    data: NodeData,
}

/// Guard rails applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLimits {
    /// Largest fragment accepted, in bytes.
    pub max_bytes: usize,
}

impl Default for FragmentLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Owned arena copy of a parsed HTML fragment.
#[derive(Debug, Clone)]
pub struct HtmlFragmentDocument {
    nodes: Vec<ArenaNode>,
    container: NodeIndex,
}

impl HtmlFragmentDocument {
    /// Parses a fragment with the default [`FragmentLimits`].
    ///
    /// # Example
    ///
    /// ```
    /// use html_fragment::HtmlFragmentDocument;
    ///
    /// let doc = HtmlFragmentDocument::parse("<p>Hi <em>there</em></p>").unwrap();
    /// assert_eq!(doc.serialize(), "<p>Hi <em>there</em></p>");
    /// ```
    pub fn parse(html: &str) -> Result<Self, FragmentError> {
        Self::parse_with_limits(html, &FragmentLimits::default())
    }

    /// Parses a fragment, rejecting input over `limits.max_bytes`.
    pub fn parse_with_limits(html: &str, limits: &FragmentLimits) -> Result<Self, FragmentError> {
        if html.len() > limits.max_bytes {
            return Err(FragmentError::Parse(ParseError::TooLarge {
                len: html.len(),
                limit: limits.max_bytes,
            }));
        }

        let wrapped = format!("<div {CONTAINER_MARKER}=\"\">{html}</div>");
        let parsed = Html::parse_fragment(&wrapped);

        let mut builder = ArenaBuilder {
            nodes: vec![ArenaNode {
                parent: None,
                children: Vec::new(),
                data: NodeData::Root,
            }],
            container: None,
        };
        builder.copy_children(ROOT, parsed.root_element());

        let container = builder
            .container
            .ok_or(FragmentError::Parse(ParseError::MissingContainer))?;
        debug_log!(
            "parsed fragment: {} nodes, container {}",
            builder.nodes.len(),
            container
        );

        Ok(Self {
            nodes: builder.nodes,
            container,
        })
    }

    /// Iterates `<img>` elements in document order.
    pub fn image_nodes(&self) -> ImageNodes<'_> {
        ImageNodes {
            doc: self,
            stack: vec![ROOT],
        }
    }

    /// Returns the element behind `node`, if `node` is a real element of this document.
    pub fn element(&self, node: NodeIndex) -> Option<&ElementData> {
        if node == self.container {
            return None;
        }
        match self.nodes.get(node.0).map(|entry| &entry.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    /// Convenience lookup of one attribute on `node`.
    pub fn attribute(&self, node: NodeIndex, name: &str) -> Option<&str> {
        self.element(node).and_then(|element| element.attribute(name))
    }

    /// Sets (or adds) an attribute on `node` in place.
    pub fn set_attribute(
        &mut self,
        node: NodeIndex,
        name: &str,
        value: &str,
    ) -> Result<(), FragmentError> {
        if node == self.container {
            return Err(FragmentError::NodeNotFound(node));
        }
        match self.nodes.get_mut(node.0).map(|entry| &mut entry.data) {
            Some(NodeData::Element(element)) => {
                element.set_attribute(name, value);
                Ok(())
            }
            _ => Err(FragmentError::NodeNotFound(node)),
        }
    }

    /// Parent of `node`, skipping the synthetic container.
    pub fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        let parent = self.nodes.get(node.0)?.parent?;
        if parent == self.container || parent == ROOT {
            None
        } else {
            Some(parent)
        }
    }

    /// Serializes the fragment with the container unwrapped into the root.
    pub fn serialize(&self) -> String {
        self.render(AttributeOrder::Parser)
    }

    /// Serializes with attributes sorted by name.
    ///
    /// Two fragments with equal canonical forms carry the same elements,
    /// attributes and text regardless of attribute order.
    pub fn serialize_canonical(&self) -> String {
        self.render(AttributeOrder::Sorted)
    }

    /// Summaries of every embedded image in document order.
    pub fn images(&self) -> Vec<ImageSummary> {
        self.image_nodes()
            .filter_map(|node| {
                let element = self.element(node)?;
                Some(ImageSummary {
                    node,
                    src: element.attribute("src").unwrap_or_default().to_string(),
                    alt: element.attribute("alt").map(str::to_string),
                    class: element.attribute("class").map(str::to_string),
                })
            })
            .collect()
    }

    fn render(&self, order: AttributeOrder) -> String {
        let mut out = String::new();
        for &child in &self.nodes[ROOT.0].children {
            if child == self.container {
                for &inner in &self.nodes[child.0].children {
                    self.write_node(inner, order, &mut out);
                }
            } else {
                self.write_node(child, order, &mut out);
            }
        }
        out
    }

    fn write_node(&self, node: NodeIndex, order: AttributeOrder, out: &mut String) {
        let entry = &self.nodes[node.0];
        match &entry.data {
            NodeData::Root => {
                for &child in &entry.children {
                    self.write_node(child, order, out);
                }
            }
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                let mut attrs: Vec<&(String, String)> = element.attrs.iter().collect();
                if order == AttributeOrder::Sorted {
                    attrs.sort();
                }
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&element.name.as_str()) {
                    return;
                }
                // The parser drops one newline right after these start tags.
                if NEWLINE_EATING_ELEMENTS.contains(&element.name.as_str())
                    && self.first_text_starts_with_newline(entry)
                {
                    out.push('\n');
                }
                for &child in &entry.children {
                    self.write_node(child, order, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
            NodeData::Text(text) => {
                if self.inside_raw_text(entry.parent) {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeData::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
        }
    }

    fn first_text_starts_with_newline(&self, entry: &ArenaNode) -> bool {
        entry
            .children
            .first()
            .is_some_and(|child| match &self.nodes[child.0].data {
                NodeData::Text(text) => text.starts_with('\n'),
                _ => false,
            })
    }

    fn inside_raw_text(&self, parent: Option<NodeIndex>) -> bool {
        parent
            .and_then(|idx| match &self.nodes[idx.0].data {
                NodeData::Element(element) => Some(element.name.as_str()),
                _ => None,
            })
            .is_some_and(|name| RAW_TEXT_ELEMENTS.contains(&name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOrder {
    Parser,
    Sorted,
}

struct ArenaBuilder {
    nodes: Vec<ArenaNode>,
    container: Option<NodeIndex>,
}

impl ArenaBuilder {
    fn push(&mut self, parent: NodeIndex, data: NodeData) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        self.nodes.push(ArenaNode {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent.0].children.push(idx);
        idx
    }

    fn copy_children(&mut self, parent: NodeIndex, source: ElementRef<'_>) {
        for child in source.children() {
            if let Node::Fragment = child.value() {
                // `<template>` contents hang off a fragment node under the element.
                for inner in child.children() {
                    self.copy_node(parent, inner.value(), ElementRef::wrap(inner));
                }
            } else {
                self.copy_node(parent, child.value(), ElementRef::wrap(child));
            }
        }
    }

    fn copy_node(&mut self, parent: NodeIndex, node: &Node, element: Option<ElementRef<'_>>) {
        match (node, element) {
            (Node::Element(value), Some(child_ref)) => {
                let data = ElementData {
                    name: value.name().to_string(),
                    attrs: value
                        .attrs
                        .iter()
                        .map(|(name, val)| {
                            let key = match &name.prefix {
                                Some(prefix) => format!("{prefix}:{}", name.local),
                                None => name.local.to_string(),
                            };
                            (key, val.to_string())
                        })
                        .collect(),
                };
                // Pre-order walk: the first marked element is the wrapper we added.
                let is_container =
                    self.container.is_none() && data.attribute(CONTAINER_MARKER).is_some();
                let idx = self.push(parent, NodeData::Element(data));
                if is_container {
                    self.container = Some(idx);
                }
                self.copy_children(idx, child_ref);
            }
            (Node::Text(text), _) => {
                self.push(parent, NodeData::Text(String::from(&**text)));
            }
            (Node::Comment(comment), _) => {
                self.push(parent, NodeData::Comment(String::from(&**comment)));
            }
            _ => {}
        }
    }
}

/// Pre-order iterator over `<img>` nodes.
pub struct ImageNodes<'a> {
    doc: &'a HtmlFragmentDocument,
    stack: Vec<NodeIndex>,
}

impl Iterator for ImageNodes<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            let entry = &self.doc.nodes[node.0];
            self.stack.extend(entry.children.iter().rev().copied());
            if let NodeData::Element(element) = &entry.data {
                if element.name.eq_ignore_ascii_case("img") {
                    return Some(node);
                }
            }
        }
        None
    }
}

/// Flat view of one embedded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    /// Arena handle.
    pub node: NodeIndex,
    /// `src` attribute, empty when absent.
    pub src: String,
    /// `alt` attribute, `None` when absent.
    pub alt: Option<String>,
    /// Raw `class` attribute.
    pub class: Option<String>,
}

/// Why a fragment could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input exceeded the configured byte limit.
    TooLarge {
        /// Input length in bytes.
        len: usize,
        /// Configured ceiling.
        limit: usize,
    },
    /// The synthetic container did not survive parsing.
    MissingContainer,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { len, limit } => {
                write!(f, "fragment is {len} bytes, limit is {limit}")
            }
            Self::MissingContainer => write!(f, "fragment container lost during parsing"),
        }
    }
}

impl Error for ParseError {}

/// Errors surfaced by [`HtmlFragmentDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// The fragment could not be parsed.
    Parse(ParseError),
    /// A node handle did not address an element of this document.
    NodeNotFound(NodeIndex),
}

impl fmt::Display for FragmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "html parse error: {err}"),
            Self::NodeNotFound(node) => write!(f, "no element at node {node}"),
        }
    }
}

impl Error for FragmentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::NodeNotFound(_) => None,
        }
    }
}

fn escape_text(text: &str) -> String {
    encode_text(text).replace('\u{a0}', "&nbsp;")
}

fn escape_attribute(value: &str) -> String {
    encode_double_quoted_attribute(value).replace('\u{a0}', "&nbsp;")
}
