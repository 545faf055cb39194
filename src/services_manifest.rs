//! `services.xml` as a typed element tree with an explicit canonicalizer
//! step, per the design note against ad-hoc XML manipulation: the manifest
//! is parsed once, pruned/queried through typed accessors, and rewritten to
//! a canonical form in one pass rather than incrementally patched in place.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{CoreError, Result};

const CUSTOM_BUNDLE: &str = "marqo-custom-components";

/// A generic XML element: a name, its attributes in document order, and its
/// children. Text content is carried as [`Node::Text`] children so mixed
/// content round-trips, though nothing in this manifest relies on it.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attrs: Vec::new(), children: Vec::new() }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.attrs.push((key.to_string(), value.into())),
        }
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter_map(move |n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    pub fn child_named(&self, name: &str) -> Option<&Element> {
        self.children_named(name).next()
    }

    pub fn child_named_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }
}

fn element_from_start(e: &BytesStart) -> Result<Element> {
    let name = std::str::from_utf8(e.name().as_ref()).map_err(|err| CoreError::Internal(err.to_string()))?.to_string();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| CoreError::Internal(format!("invalid xml attribute: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|err| CoreError::Internal(err.to_string()))?.to_string();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(Element { name, attrs, children: Vec::new() })
}

fn push_node(stack: &mut Vec<Element>, root: &mut Option<Element>, node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if let Node::Element(e) = node {
        *root = Some(e);
    }
}

/// Parses an XML document into a single root [`Element`].
pub fn parse_xml(input: &str) -> Result<Element> {
    let mut reader = Reader::from_str(input);
    reader.trim_text(true);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                stack.push(element_from_start(&e)?);
            }
            Event::Empty(e) => {
                let el = element_from_start(&e)?;
                push_node(&mut stack, &mut root, Node::Element(el));
            }
            Event::End(_) => {
                let el = stack.pop().ok_or_else(|| CoreError::Internal("unbalanced xml: unmatched closing tag".into()))?;
                push_node(&mut stack, &mut root, Node::Element(el));
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                if !text.trim().is_empty() {
                    if let Some(top) = stack.last_mut() {
                        top.children.push(Node::Text(text));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    root.ok_or_else(|| CoreError::Internal("xml document has no root element".into()))
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, el: &Element) -> Result<()> {
    if el.children.is_empty() {
        let mut start = BytesStart::new(el.name.as_str());
        for (k, v) in &el.attrs {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    let mut start = BytesStart::new(el.name.as_str());
    for (k, v) in &el.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    writer.write_event(Event::Start(start))?;
    for child in &el.children {
        match child {
            Node::Element(c) => write_element(writer, c)?,
            Node::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
    Ok(())
}

/// Serializes an [`Element`] back to an XML string, two-space indented.
pub fn to_xml_string(el: &Element) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    write_element(&mut writer, el)?;
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|err| CoreError::Internal(err.to_string()))
}

/// The `services.xml` manifest: exactly one `content/documents` and one
/// `container`, enforced on every structural access.
#[derive(Clone, Debug)]
pub struct ServicesManifest {
    pub root: Element,
}

impl ServicesManifest {
    pub fn from_str(xml: &str) -> Result<Self> {
        let root = parse_xml(xml)?;
        let manifest = Self { root };
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_xml_string(&self) -> Result<String> {
        to_xml_string(&self.root)
    }

    /// A minimal skeleton: one `content` block with one `documents`
    /// element, one `container` block. Used when bootstrapping a package
    /// that has no pre-existing `services.xml`.
    pub fn default_skeleton(content_id: &str) -> Self {
        let container = Element::new("container").with_attr("id", "default").with_attr("version", "1.0");
        let content = Element::new("content")
            .with_attr("id", content_id)
            .with_attr("version", "1.0")
            .with_child(Element::new("documents"));
        let root = Element::new("services").with_attr("version", "1.0").with_child(container).with_child(content);
        Self { root }
    }

    /// Enforces exactly one `content/documents` and exactly one `container`;
    /// anything else is a broken invariant.
    fn validate(&self) -> Result<()> {
        self.documents_element()?;
        self.container_element()?;
        Ok(())
    }

    fn documents_element(&self) -> Result<&Element> {
        let contents: Vec<&Element> = self.root.children_named("content").collect();
        if contents.len() != 1 {
            return Err(CoreError::Internal(format!("expected exactly one <content> element, found {}", contents.len())));
        }
        let docs: Vec<&Element> = contents[0].children_named("documents").collect();
        if docs.len() != 1 {
            return Err(CoreError::Internal(format!("expected exactly one <content>/<documents> element, found {}", docs.len())));
        }
        Ok(docs[0])
    }

    fn documents_element_mut(&mut self) -> Result<&mut Element> {
        let contents: Vec<usize> = self
            .root
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, n)| match n {
                Node::Element(e) if e.name == "content" => Some(i),
                _ => None,
            })
            .collect();
        if contents.len() != 1 {
            return Err(CoreError::Internal(format!("expected exactly one <content> element, found {}", contents.len())));
        }
        let Node::Element(content) = &mut self.root.children[contents[0]] else { unreachable!() };
        let docs: Vec<usize> = content
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, n)| match n {
                Node::Element(e) if e.name == "documents" => Some(i),
                _ => None,
            })
            .collect();
        if docs.len() != 1 {
            return Err(CoreError::Internal(format!("expected exactly one <content>/<documents> element, found {}", docs.len())));
        }
        let Node::Element(documents) = &mut content.children[docs[0]] else { unreachable!() };
        Ok(documents)
    }

    fn container_element_mut(&mut self) -> Result<&mut Element> {
        let idx: Vec<usize> = self
            .root
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, n)| match n {
                Node::Element(e) if e.name == "container" => Some(i),
                _ => None,
            })
            .collect();
        if idx.len() != 1 {
            return Err(CoreError::Internal(format!("expected exactly one <container> element, found {}", idx.len())));
        }
        let Node::Element(container) = &mut self.root.children[idx[0]] else { unreachable!() };
        Ok(container)
    }

    fn container_element(&self) -> Result<&Element> {
        let containers: Vec<&Element> = self.root.children_named("container").collect();
        if containers.len() != 1 {
            return Err(CoreError::Internal(format!("expected exactly one <container> element, found {}", containers.len())));
        }
        Ok(containers[0])
    }

    pub fn has_schema(&self, name: &str) -> bool {
        match self.documents_element() {
            Ok(docs) => docs.children_named("document").any(|d| d.attr("type") == Some(name)),
            Err(_) => false,
        }
    }

    /// Appends `document[@type=name, @mode=index]` unless a document of
    /// that type is already registered.
    pub fn add_schema(&mut self, name: &str) -> Result<()> {
        if self.has_schema(name) {
            return Ok(());
        }
        let documents = self.documents_element_mut()?;
        documents.children.push(Node::Element(Element::new("document").with_attr("type", name).with_attr("mode", "index")));
        Ok(())
    }

    /// Deletes every `document` child matching `name`.
    pub fn remove_schema(&mut self, name: &str) -> Result<()> {
        let documents = self.documents_element_mut()?;
        documents.children.retain(|n| !matches!(n, Node::Element(e) if e.name == "document" && e.attr("type") == Some(name)));
        Ok(())
    }

    /// Rewrites the container's children to the canonical set: a search
    /// chain `marqo` inheriting `vespa` with one custom hybrid searcher, an
    /// index-settings HTTP handler bound to `/index-settings` and
    /// `/index-settings/*`, and an index-settings configuration component
    /// pointing at the two settings JSON files. Unrecognized children
    /// (other than `node`) are dropped; `document-api` and `search` are
    /// cleared to a known-empty state before re-population, rather than
    /// patched incrementally.
    pub fn config_components(&mut self) -> Result<()> {
        let preserved_nodes: Vec<Node> = {
            let container = self.container_element_mut()?;
            container.children.iter().filter(|n| matches!(n, Node::Element(e) if e.name == "node")).cloned().collect()
        };

        let search_chain = Element::new("chain")
            .with_attr("id", "marqo")
            .with_attr("inherits", "vespa")
            .with_child(Element::new("searcher").with_attr("id", "ai.marqo.search.HybridSearcher").with_attr("bundle", CUSTOM_BUNDLE));
        let search = Element::new("search").with_child(search_chain);

        let handler = Element::new("handler")
            .with_attr("id", "ai.marqo.index.IndexSettingsHandler")
            .with_attr("bundle", CUSTOM_BUNDLE)
            .with_child(Element::new("binding").with_text("http://*/index-settings"))
            .with_child(Element::new("binding").with_text("http://*/index-settings/*"));

        let settings_config = Element::new("config")
            .with_attr("name", "ai.marqo.index.index-settings")
            .with_child(Element::new("settingsFile").with_text("marqo_index_settings.json"))
            .with_child(Element::new("settingsHistoryFile").with_text("marqo_index_settings_history.json"));
        let component = Element::new("component").with_attr("id", "ai.marqo.index.IndexSettingsConfig").with_attr("bundle", CUSTOM_BUNDLE).with_child(settings_config);

        let container = self.container_element_mut()?;
        container.children.clear();
        container.children.push(Node::Element(Element::new("document-api")));
        container.children.push(Node::Element(search));
        container.children.push(Node::Element(handler));
        container.children.push(Node::Element(component));
        container.children.extend(preserved_nodes);
        Ok(())
    }

    /// Number of searchers registered under the `marqo` search chain; used
    /// by the bootstrap-upgrade scenario to assert canonicalization left
    /// exactly one.
    pub fn marqo_chain_searcher_count(&self) -> usize {
        self.container_element()
            .ok()
            .and_then(|c| c.child_named("search"))
            .and_then(|s| s.children_named("chain").find(|c| c.attr("id") == Some("marqo")))
            .map(|chain| chain.children_named("searcher").count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_parse_and_serialize() {
        let xml = "<services version=\"1.0\"><container id=\"default\" version=\"1.0\"/><content id=\"marqo\" version=\"1.0\"><documents/></content></services>";
        let manifest = ServicesManifest::from_str(xml).unwrap();
        let out = manifest.to_xml_string().unwrap();
        let reparsed = ServicesManifest::from_str(&out).unwrap();
        assert_eq!(reparsed.root, manifest.root);
    }

    #[test]
    fn rejects_missing_documents_element() {
        let xml = "<services><container id=\"default\"/><content id=\"c\"/></services>";
        let err = ServicesManifest::from_str(xml).unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }

    #[test]
    fn rejects_multiple_content_elements() {
        let xml = "<services><container id=\"default\"/><content id=\"a\"><documents/></content><content id=\"b\"><documents/></content></services>";
        let err = ServicesManifest::from_str(xml).unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }

    #[test]
    fn add_schema_is_idempotent() {
        let mut manifest = ServicesManifest::default_skeleton("marqo");
        manifest.add_schema("products_1").unwrap();
        manifest.add_schema("products_1").unwrap();
        let count = manifest.documents_element().unwrap().children_named("document").filter(|d| d.attr("type") == Some("products_1")).count();
        assert_eq!(count, 1);
        assert!(manifest.has_schema("products_1"));
    }

    #[test]
    fn remove_schema_deletes_all_matches() {
        let mut manifest = ServicesManifest::default_skeleton("marqo");
        manifest.add_schema("products_1").unwrap();
        manifest.remove_schema("products_1").unwrap();
        assert!(!manifest.has_schema("products_1"));
    }

    #[test]
    fn config_components_yields_exactly_one_searcher_in_marqo_chain() {
        let mut manifest = ServicesManifest::default_skeleton("marqo");
        manifest.config_components().unwrap();
        assert_eq!(manifest.marqo_chain_searcher_count(), 1);
        let container = manifest.container_element().unwrap();
        assert!(container.child_named("handler").is_some());
        assert!(container.child_named("component").is_some());
    }

    #[test]
    fn config_components_drops_unrecognized_children_but_keeps_node() {
        let mut manifest = ServicesManifest::default_skeleton("marqo");
        {
            let container = manifest.container_element_mut().unwrap();
            container.children.push(Node::Element(Element::new("node").with_attr("hostalias", "a")));
            container.children.push(Node::Element(Element::new("some-stale-thing")));
        }
        manifest.config_components().unwrap();
        let container = manifest.container_element().unwrap();
        assert!(container.child_named("node").is_some());
        assert!(container.child_named("some-stale-thing").is_none());
    }

    #[test]
    fn config_components_is_idempotent() {
        let mut manifest = ServicesManifest::default_skeleton("marqo");
        manifest.config_components().unwrap();
        let first = manifest.to_xml_string().unwrap();
        manifest.config_components().unwrap();
        let second = manifest.to_xml_string().unwrap();
        assert_eq!(first, second);
    }
}
