//! In-memory page for unit testing.
//!
//! [`MockDriver`] answers every [`Driver`] call from a [`MockDocument`]: a
//! small element tree matched with the `scraper` selector engine. Queries run
//! against the document as an HTML parser sees it, so table rows need a
//! `<tbody>` and stray `<tr>`/`<td>` outside a table never match, exactly as
//! in a browser. Pseudo-classes that depend on live page state (`:hover`,
//! `:checked`, ...) are rejected as invalid selectors.
//!
//! The document sits behind a `tokio::sync::RwLock` shared by every clone of
//! the driver, so a test can keep one clone to mutate the page from another
//! task while a wait polls through the other. Removing an element or loading
//! a new document detaches the old handles exactly like a real page does.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::driver::{ClientRect, ComputedStyle, Driver, Probe, SelectOption};
use crate::query::dynamic_pseudo_class;
use crate::result::{SettleError, SettleResult};

/// Default mock viewport width (matches a stock headless window)
pub const DEFAULT_VIEWPORT_WIDTH: f64 = 800.0;

/// Default mock viewport height
pub const DEFAULT_VIEWPORT_HEIGHT: f64 = 600.0;

// Marker attribute mapping parsed elements back to arena nodes
const NODE_ATTRIBUTE: &str = "data-settle-node";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: f64,
    /// Height in CSS pixels
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

impl Viewport {
    /// Create a viewport
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// The viewport as a client rectangle
    #[must_use]
    pub const fn rect(&self) -> ClientRect {
        ClientRect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Index of an element inside a [`MockDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Handle returned by [`MockDriver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockHandle {
    generation: u64,
    node: NodeId,
}

impl MockHandle {
    /// Node this handle points at
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }
}

impl From<MockHandle> for NodeId {
    fn from(handle: MockHandle) -> Self {
        handle.node
    }
}

impl From<&MockHandle> for NodeId {
    fn from(handle: &MockHandle) -> Self {
        handle.node
    }
}

/// One element of the mock page
#[derive(Debug, Clone)]
pub struct MockElement {
    /// Lower-case tag name
    pub tag: String,
    /// Attributes (`id` and `class` included)
    pub attributes: BTreeMap<String, String>,
    /// Own text, children's text is appended for `innerText`
    pub text: String,
    /// `value` property
    pub value: Option<String>,
    /// `checked` property
    pub checked: bool,
    /// Computed style
    pub style: ComputedStyle,
    /// Client rectangle
    pub rect: ClientRect,
}

impl MockElement {
    /// Create an element with a visible 100x20 box at the origin
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            value: None,
            checked: false,
            style: ComputedStyle::default(),
            rect: ClientRect::new(0.0, 0.0, 100.0, 20.0),
        }
    }

    /// Set the `id` attribute
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_attr("id", id)
    }

    /// Set the `class` attribute
    #[must_use]
    pub fn with_class(self, class: impl Into<String>) -> Self {
        self.with_attr("class", class)
    }

    /// Set any attribute
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set own text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the `value` property
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set the `checked` property
    #[must_use]
    pub const fn with_checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    /// Set the computed style
    #[must_use]
    pub fn with_style(mut self, style: ComputedStyle) -> Self {
        self.style = style;
        self
    }

    /// Set the client rectangle
    #[must_use]
    pub const fn with_rect(mut self, rect: ClientRect) -> Self {
        self.rect = rect;
        self
    }

    /// Attribute value
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct Node {
    element: MockElement,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
}

/// An element tree rooted at `<html>` with an empty `<body>`
#[derive(Debug, Clone)]
pub struct MockDocument {
    nodes: Vec<Node>,
    viewport: Viewport,
}

impl Default for MockDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDocument {
    /// Create an empty document with the default viewport
    #[must_use]
    pub fn new() -> Self {
        Self::with_viewport(Viewport::default())
    }

    /// Create an empty document with the given viewport
    #[must_use]
    pub fn with_viewport(viewport: Viewport) -> Self {
        let html = Node {
            element: MockElement::new("html").with_rect(viewport.rect()),
            parent: None,
            children: vec![NodeId(1)],
            attached: true,
        };
        let body = Node {
            element: MockElement::new("body").with_rect(viewport.rect()),
            parent: Some(NodeId(0)),
            children: Vec::new(),
            attached: true,
        };
        Self {
            nodes: vec![html, body],
            viewport,
        }
    }

    /// The `<html>` element
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The `<body>` element
    #[must_use]
    pub const fn body(&self) -> NodeId {
        NodeId(1)
    }

    /// Viewport of this document
    #[must_use]
    pub const fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Append `element` as the last child of `parent`
    pub fn append(&mut self, parent: NodeId, element: MockElement) -> NodeId {
        let id = NodeId(self.nodes.len());
        let attached = self.is_attached(parent);
        self.nodes.push(Node {
            element,
            parent: Some(parent),
            children: Vec::new(),
            attached,
        });
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(id);
        }
        id
    }

    /// Detach `id` and its subtree from the document
    pub fn remove(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes.get(id.0).and_then(|n| n.parent) {
            if let Some(node) = self.nodes.get_mut(parent.0) {
                node.children.retain(|child| *child != id);
            }
        }
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(current.0) {
                node.attached = false;
                pending.extend(node.children.iter().copied());
            }
        }
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.parent = None;
        }
    }

    /// Whether `id` is still part of the document
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|n| n.attached)
    }

    /// Element data
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&MockElement> {
        self.nodes.get(id.0).map(|n| &n.element)
    }

    /// Mutable element data
    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut MockElement> {
        self.nodes.get_mut(id.0).map(|n| &mut n.element)
    }

    /// Parent element; `<html>` has none
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Next element sibling
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = &self.nodes.get(self.parent(id)?.0)?.children;
        let position = siblings.iter().position(|s| *s == id)?;
        siblings.get(position + 1).copied()
    }

    /// Previous element sibling
    #[must_use]
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = &self.nodes.get(self.parent(id)?.0)?.children;
        let position = siblings.iter().position(|s| *s == id)?;
        position.checked_sub(1).and_then(|p| siblings.get(p).copied())
    }

    /// Own text followed by every descendant's text, newline separated
    #[must_use]
    pub fn inner_text(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        for node in std::iter::once(id).chain(self.descendants(id)) {
            if let Some(element) = self.element(node) {
                if !element.text.is_empty() {
                    parts.push(element.text.clone());
                }
            }
        }
        parts.join("\n")
    }

    /// Options of a `<select>` element (its `<option>` children)
    #[must_use]
    pub fn select_options(&self, id: NodeId) -> Vec<SelectOption> {
        self.descendants(id)
            .into_iter()
            .filter_map(|child| self.element(child))
            .filter(|element| element.tag == "option")
            .map(|option| SelectOption {
                value: option
                    .attr("value")
                    .map_or_else(|| option.text.clone(), str::to_string),
                label: option.text.clone(),
                selected: option.attributes.contains_key("selected"),
            })
            .collect()
    }

    /// Descendants of `id` in document (pre-)order, `id` excluded
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(id.0)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.nodes.get(current.0) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// All elements matching `selector`, in document order.
    ///
    /// With `within`, only descendants of that element are candidates but
    /// ancestors outside it still take part in matching, as with
    /// `Element.querySelectorAll`.
    pub fn query(&self, selector: &str, within: Option<NodeId>) -> SettleResult<Vec<NodeId>> {
        let invalid = |reason: String| SettleError::InvalidSelector {
            selector: selector.to_string(),
            reason,
        };
        if let Some(name) = dynamic_pseudo_class(selector) {
            return Err(invalid(format!(
                "':{name}' depends on live page state the mock page does not model"
            )));
        }
        let parsed = Selector::parse(selector).map_err(|e| invalid(e.to_string()))?;
        let html = Html::parse_document(&self.to_html());

        let found: Vec<NodeId> = match within {
            None => html.select(&parsed).filter_map(node_id).collect(),
            Some(scope) => {
                let Some(scope_ref) = html
                    .root_element()
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .find(|el| node_id(*el) == Some(scope))
                else {
                    return Ok(Vec::new());
                };
                scope_ref
                    .select(&parsed)
                    .filter_map(node_id)
                    .filter(|id| *id != scope)
                    .collect()
            }
        };
        Ok(found)
    }

    /// The attached tree as HTML, every element tagged with its node index
    fn to_html(&self) -> String {
        let mut out = String::from("<!DOCTYPE html>");
        self.write_html(self.root(), &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        let element = &node.element;
        out.push('<');
        out.push_str(&element.tag);
        out.push_str(&format!(" {NODE_ATTRIBUTE}=\"{}\"", id.0));
        for (name, value) in &element.attributes {
            out.push_str(&format!(" {name}=\"{}\"", escape_html(value)));
        }
        out.push('>');
        out.push_str(&escape_html(&element.text));
        for child in &node.children {
            self.write_html(*child, out);
        }
        if !VOID_ELEMENTS.contains(&element.tag.as_str()) {
            out.push_str(&format!("</{}>", element.tag));
        }
    }

    fn intersection_ratio(&self, id: NodeId) -> f64 {
        let Some(element) = self.element(id) else {
            return 0.0;
        };
        let area = element.rect.width * element.rect.height;
        if area <= 0.0 {
            return 0.0;
        }
        (self.viewport.rect().intersection_area(&element.rect) / area).clamp(0.0, 1.0)
    }
}

fn node_id(element: ElementRef<'_>) -> Option<NodeId> {
    element
        .value()
        .attr(NODE_ATTRIBUTE)
        .and_then(|raw| raw.parse().ok())
        .map(NodeId)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Default)]
struct MockState {
    page: Option<MockDocument>,
    generation: u64,
    calls: Vec<String>,
}

impl MockState {
    fn document(&self, handle: &MockHandle) -> SettleResult<&MockDocument> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| SettleError::detached("the page has been closed"))?;
        if handle.generation != self.generation {
            return Err(SettleError::detached("the document has been replaced"));
        }
        if !page.is_attached(handle.node) {
            return Err(SettleError::detached(format!(
                "element #{} has been removed",
                handle.node.0
            )));
        }
        Ok(page)
    }

    fn handle(&self, node: NodeId) -> MockHandle {
        MockHandle {
            generation: self.generation,
            node,
        }
    }
}

/// Mock driver for unit testing
#[derive(Debug, Clone)]
pub struct MockDriver {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Driver with an empty page
    #[must_use]
    pub fn new() -> Self {
        Self::from_document(MockDocument::new())
    }

    /// Driver serving `document`
    #[must_use]
    pub fn from_document(document: MockDocument) -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState {
                page: Some(document),
                ..MockState::default()
            })),
        }
    }

    /// Driver with no page loaded yet
    #[must_use]
    pub fn without_page() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    /// Replace the page; every handle handed out so far becomes detached
    pub async fn load(&self, document: MockDocument) {
        let mut state = self.state.write().await;
        state.page = Some(document);
        state.generation += 1;
        state.calls.push("load".to_string());
    }

    /// Drop the page
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.page = None;
        state.generation += 1;
        state.calls.push("close".to_string());
    }

    /// The `<body>` of the current page
    #[must_use]
    pub fn body(&self) -> NodeId {
        NodeId(1)
    }

    /// Append an element to the current page; `None` when no page is loaded
    pub async fn append(&self, parent: impl Into<NodeId>, element: MockElement) -> Option<NodeId> {
        let parent = parent.into();
        let mut state = self.state.write().await;
        state.page.as_mut().map(|page| page.append(parent, element))
    }

    /// Mutate an element in place
    pub async fn update(&self, node: impl Into<NodeId>, f: impl FnOnce(&mut MockElement) + Send) {
        let node = node.into();
        let mut state = self.state.write().await;
        if let Some(element) = state.page.as_mut().and_then(|p| p.element_mut(node)) {
            f(element);
        }
    }

    /// Remove an element (and its subtree) from the page
    pub async fn remove(&self, node: impl Into<NodeId>) {
        let node = node.into();
        let mut state = self.state.write().await;
        if let Some(page) = state.page.as_mut() {
            page.remove(node);
        }
    }

    /// Read the element behind a handle, if still attached
    pub async fn element(&self, handle: &MockHandle) -> Option<MockElement> {
        let state = self.state.read().await;
        state
            .document(handle)
            .ok()
            .and_then(|page| page.element(handle.node).cloned())
    }

    /// Driver calls recorded so far
    pub async fn history(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    /// Whether a call starting with `method` was recorded
    pub async fn was_called(&self, method: &str) -> bool {
        self.state
            .read()
            .await
            .calls
            .iter()
            .any(|call| call.starts_with(method))
    }

    /// Number of recorded calls starting with `method`
    pub async fn call_count(&self, method: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|call| call.starts_with(method))
            .count()
    }

    async fn record(&self, call: String) {
        self.state.write().await.calls.push(call);
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Handle = MockHandle;

    async fn query_all(&self, selector: &str) -> SettleResult<Vec<MockHandle>> {
        self.record(format!("query_all:{selector}")).await;
        let state = self.state.read().await;
        let page = state.page.as_ref().ok_or_else(|| SettleError::NoPage {
            action: "query selector".to_string(),
            selector: selector.to_string(),
        })?;
        Ok(page
            .query(selector, None)?
            .into_iter()
            .map(|node| state.handle(node))
            .collect())
    }

    async fn query_all_within(
        &self,
        handle: &MockHandle,
        selector: &str,
    ) -> SettleResult<Vec<MockHandle>> {
        self.record(format!("query_all_within:{selector}")).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        Ok(page
            .query(selector, Some(handle.node))?
            .into_iter()
            .map(|node| state.handle(node))
            .collect())
    }

    async fn evaluate(&self, handle: &MockHandle, probe: &Probe) -> SettleResult<Value> {
        self.record(format!("evaluate:{probe:?}")).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        let element = page
            .element(handle.node)
            .ok_or_else(|| SettleError::detached("unknown element"))?;
        let value = match probe {
            Probe::InnerText => json!(page.inner_text(handle.node)),
            Probe::Value => json!(element.value),
            Probe::Placeholder => json!(element.attr("placeholder")),
            Probe::AriaLabel => json!(element.attr("aria-label")),
            Probe::Attribute(name) => json!(element.attr(name)),
            Probe::ClassList => json!(element
                .attr("class")
                .map(|c| c.split_whitespace().collect::<Vec<_>>())
                .unwrap_or_default()),
            Probe::ComputedStyle => serde_json::to_value(&element.style)?,
            Probe::Disabled => json!(element.attributes.contains_key("disabled")),
            Probe::ReadOnly => json!(element.attributes.contains_key("readonly")),
            Probe::Checked => json!(element.checked),
            Probe::SelectOptions => serde_json::to_value(page.select_options(handle.node))?,
        };
        Ok(value)
    }

    async fn parent(&self, handle: &MockHandle) -> SettleResult<Option<MockHandle>> {
        self.record("parent".to_string()).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        Ok(page.parent(handle.node).map(|node| state.handle(node)))
    }

    async fn next_sibling(&self, handle: &MockHandle) -> SettleResult<Option<MockHandle>> {
        self.record("next_sibling".to_string()).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        Ok(page.next_sibling(handle.node).map(|node| state.handle(node)))
    }

    async fn previous_sibling(&self, handle: &MockHandle) -> SettleResult<Option<MockHandle>> {
        self.record("previous_sibling".to_string()).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        Ok(page.previous_sibling(handle.node).map(|node| state.handle(node)))
    }

    async fn bounding_box(&self, handle: &MockHandle) -> SettleResult<ClientRect> {
        self.record("bounding_box".to_string()).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        page.element(handle.node)
            .map(|element| element.rect)
            .ok_or_else(|| SettleError::detached("unknown element"))
    }

    async fn intersection_ratio(&self, handle: &MockHandle) -> SettleResult<f64> {
        self.record("intersection_ratio".to_string()).await;
        let state = self.state.read().await;
        let page = state.document(handle)?;
        Ok(page.intersection_ratio(handle.node))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn table_document() -> (MockDocument, Vec<NodeId>) {
        let mut doc = MockDocument::new();
        let table = doc.append(doc.body(), MockElement::new("table").with_id("grid"));
        let tbody = doc.append(table, MockElement::new("tbody"));
        let mut rows = Vec::new();
        for i in 1..=3 {
            let row = doc.append(
                tbody,
                MockElement::new("tr")
                    .with_attr("role", "row")
                    .with_attr("data-test-id", format!("row{i}")),
            );
            let cell = doc.append(row, MockElement::new("td").with_text(format!("Row {i}")));
            doc.append(
                cell,
                MockElement::new("input").with_attr("type", "checkbox"),
            );
            rows.push(row);
        }
        (doc, rows)
    }

    mod css_tests {
        use super::*;

        #[test]
        fn test_attribute_selector_quoted_and_bare() {
            let (doc, rows) = table_document();
            assert_eq!(doc.query("[role=\"row\"]", None).unwrap(), rows);
            assert_eq!(doc.query("[role=row]", None).unwrap(), rows);
            assert_eq!(doc.query("tr[role='row']", None).unwrap(), rows);
        }

        #[test]
        fn test_descendant_and_child_combinators() {
            let (doc, _) = table_document();
            assert_eq!(doc.query("table input", None).unwrap().len(), 3);
            assert_eq!(doc.query("tbody > tr", None).unwrap().len(), 3);
            assert!(doc.query("table > tr", None).unwrap().is_empty());
            assert!(doc.query("table > input", None).unwrap().is_empty());
        }

        #[test]
        fn test_structural_pseudo_classes_and_sibling_combinators() {
            let (doc, rows) = table_document();
            assert_eq!(doc.query("tr:nth-child(2)", None).unwrap(), vec![rows[1]]);
            assert_eq!(doc.query("tr:last-child", None).unwrap(), vec![rows[2]]);
            assert_eq!(
                doc.query("tr:not([data-test-id=row2])", None).unwrap(),
                vec![rows[0], rows[2]]
            );
            assert_eq!(doc.query("tr + tr", None).unwrap(), rows[1..].to_vec());
            assert_eq!(doc.query("[data-test-id=row2] ~ tr", None).unwrap(), vec![rows[2]]);
        }

        #[test]
        fn test_attribute_operators() {
            let mut doc = MockDocument::new();
            let link = doc.append(
                doc.body(),
                MockElement::new("a")
                    .with_class("nav primary")
                    .with_attr("href", "https://example.com/docs"),
            );
            doc.append(doc.body(), MockElement::new("a").with_attr("href", "/local"));
            assert_eq!(doc.query("[class~=primary]", None).unwrap(), vec![link]);
            assert_eq!(doc.query("a[href^=\"https\"]", None).unwrap(), vec![link]);
            assert_eq!(doc.query("a[href$=docs]", None).unwrap(), vec![link]);
            assert_eq!(doc.query("a[href*=local]", None).unwrap().len(), 1);
        }

        #[test]
        fn test_text_and_attributes_are_escaped() {
            let mut doc = MockDocument::new();
            let tricky = doc.append(
                doc.body(),
                MockElement::new("div")
                    .with_attr("title", "say \"hi\" <b>")
                    .with_text("</div><span id=\"fake\"></span>"),
            );
            assert_eq!(doc.query("[title='say \"hi\" <b>']", None).unwrap(), vec![tricky]);
            assert!(doc.query("#fake", None).unwrap().is_empty());
        }

        #[test]
        fn test_id_class_and_list() {
            let mut doc = MockDocument::new();
            let a = doc.append(doc.body(), MockElement::new("div").with_class("a b"));
            let b = doc.append(doc.body(), MockElement::new("span").with_id("x"));
            assert_eq!(doc.query(".a.b", None).unwrap(), vec![a]);
            assert_eq!(doc.query("#x", None).unwrap(), vec![b]);
            assert_eq!(doc.query("#x, div.a", None).unwrap(), vec![a, b]);
            assert!(doc.query(".c", None).unwrap().is_empty());
        }

        #[test]
        fn test_scoped_query_excludes_scope_itself() {
            let (doc, rows) = table_document();
            let inside = doc.query("tr", Some(rows[0])).unwrap();
            assert!(doc.query("[role=row]", Some(rows[0])).unwrap().is_empty());
            assert!(inside.is_empty());
            let checkboxes = doc.query("input[type=checkbox]", Some(rows[1])).unwrap();
            assert_eq!(checkboxes.len(), 1);
        }

        #[test]
        fn test_scoped_query_matches_against_outer_ancestors() {
            let (doc, rows) = table_document();
            let found = doc.query("table td", Some(rows[2])).unwrap();
            assert_eq!(found.len(), 1);
        }

        #[test]
        fn test_invalid_selectors() {
            let doc = MockDocument::new();
            for bad in ["> div", "div >", "a,,b", "div:hover", "input:checked", "div[", "#"] {
                let err = doc.query(bad, None).unwrap_err();
                assert!(matches!(err, SettleError::InvalidSelector { .. }), "{bad} -> {err}");
            }
        }
    }

    mod document_tests {
        use super::*;

        #[test]
        fn test_siblings() {
            let (doc, rows) = table_document();
            assert_eq!(doc.next_sibling(rows[0]), Some(rows[1]));
            assert_eq!(doc.next_sibling(rows[2]), None);
            assert_eq!(doc.previous_sibling(rows[0]), None);
            assert_eq!(doc.previous_sibling(rows[2]), Some(rows[1]));
            assert_eq!(doc.next_sibling(doc.root()), None);
        }

        #[test]
        fn test_remove_detaches_subtree() {
            let (mut doc, rows) = table_document();
            let inputs = doc.query("input", Some(rows[0])).unwrap();
            doc.remove(rows[0]);
            assert!(!doc.is_attached(rows[0]));
            assert!(!doc.is_attached(inputs[0]));
            assert_eq!(doc.query("tr", None).unwrap(), rows[1..].to_vec());
        }

        #[test]
        fn test_inner_text_includes_descendants() {
            let (doc, rows) = table_document();
            assert_eq!(doc.inner_text(rows[1]), "Row 2");
        }

        #[test]
        fn test_select_options() {
            let mut doc = MockDocument::new();
            let select = doc.append(doc.body(), MockElement::new("select"));
            doc.append(select, MockElement::new("option").with_attr("value", "1").with_text("One"));
            doc.append(
                select,
                MockElement::new("option")
                    .with_attr("value", "2")
                    .with_attr("selected", "")
                    .with_text("Two"),
            );
            let options = doc.select_options(select);
            assert_eq!(options.len(), 2);
            assert_eq!(options[1].label, "Two");
            assert!(options[1].selected);
            assert!(!options[0].selected);
        }

        #[test]
        fn test_intersection_ratio() {
            let mut doc = MockDocument::with_viewport(Viewport::new(100.0, 100.0));
            let inside = doc.append(
                doc.body(),
                MockElement::new("div").with_rect(ClientRect::new(10.0, 10.0, 10.0, 10.0)),
            );
            let half = doc.append(
                doc.body(),
                MockElement::new("div").with_rect(ClientRect::new(90.0, 0.0, 10.0, 20.0)),
            );
            let outside = doc.append(
                doc.body(),
                MockElement::new("div").with_rect(ClientRect::new(500.0, 0.0, 10.0, 10.0)),
            );
            assert!((doc.intersection_ratio(inside) - 1.0).abs() < f64::EPSILON);
            assert!((doc.intersection_ratio(half) - 0.5).abs() < f64::EPSILON);
            assert!(doc.intersection_ratio(outside).abs() < f64::EPSILON);
        }
    }

    mod driver_tests {
        use super::*;

        #[tokio::test]
        async fn test_query_all_records_calls() {
            let (doc, _) = table_document();
            let driver = MockDriver::from_document(doc);
            let rows = driver.query_all("tr").await.unwrap();
            assert_eq!(rows.len(), 3);
            assert!(driver.was_called("query_all:tr").await);
            assert_eq!(driver.call_count("query_all").await, 1);
        }

        #[tokio::test]
        async fn test_no_page_is_configuration_error() {
            let driver = MockDriver::without_page();
            let err = driver.query_all("foobar").await.unwrap_err();
            assert!(err.is_configuration());
            assert_eq!(
                err.to_string(),
                "Cannot query selector 'foobar' because no browser has been launched"
            );
        }

        #[tokio::test]
        async fn test_removed_element_is_detached() {
            let (doc, rows) = table_document();
            let driver = MockDriver::from_document(doc);
            let handles = driver.query_all("tr").await.unwrap();
            driver.remove(rows[0]).await;
            let err = driver.evaluate(&handles[0], &Probe::InnerText).await.unwrap_err();
            assert!(err.is_detachment());
            assert!(driver.evaluate(&handles[1], &Probe::InnerText).await.is_ok());
        }

        #[tokio::test]
        async fn test_load_detaches_every_old_handle() {
            let (doc, _) = table_document();
            let driver = MockDriver::from_document(doc.clone());
            let before = driver.query_all("tr").await.unwrap();
            driver.load(doc).await;
            let err = driver.bounding_box(&before[0]).await.unwrap_err();
            assert!(err.is_detachment());
            let after = driver.query_all("tr").await.unwrap();
            assert!(driver.bounding_box(&after[0]).await.is_ok());
        }

        #[tokio::test]
        async fn test_extractions() {
            let mut doc = MockDocument::new();
            let input = doc.append(
                doc.body(),
                MockElement::new("input")
                    .with_class("big red")
                    .with_attr("placeholder", "Name")
                    .with_attr("aria-label", "Your name")
                    .with_attr("disabled", "")
                    .with_value("bob"),
            );
            let driver = MockDriver::from_document(doc);
            let handle = driver.query_all("input").await.unwrap()[0];
            assert_eq!(handle.node(), input);

            let eval = |probe: Probe| {
                let driver = driver.clone();
                async move { driver.evaluate(&handle, &probe).await.unwrap() }
            };
            assert_eq!(eval(Probe::Value).await, json!("bob"));
            assert_eq!(eval(Probe::Placeholder).await, json!("Name"));
            assert_eq!(eval(Probe::AriaLabel).await, json!("Your name"));
            assert_eq!(eval(Probe::ClassList).await, json!(["big", "red"]));
            assert_eq!(eval(Probe::Disabled).await, json!(true));
            assert_eq!(eval(Probe::ReadOnly).await, json!(false));
            assert_eq!(eval(Probe::Attribute("missing".to_string())).await, Value::Null);
        }

        #[tokio::test]
        async fn test_append_without_page_returns_none() {
            let driver = MockDriver::without_page();
            assert!(driver.append(NodeId(1), MockElement::new("div")).await.is_none());

            let driver = MockDriver::new();
            let added = driver
                .append(driver.body(), MockElement::new("div").with_id("late"))
                .await
                .unwrap();
            let found = driver.query_all("#late").await.unwrap();
            assert_eq!(found[0].node(), added);
        }

        #[tokio::test]
        async fn test_update_is_visible_through_clones() {
            let (doc, rows) = table_document();
            let driver = MockDriver::from_document(doc);
            let other = driver.clone();
            other
                .update(rows[0], |row| row.style.opacity = "0".to_string())
                .await;
            let handle = driver.query_all("tr").await.unwrap()[0];
            let style = driver.element(&handle).await.unwrap().style;
            assert!(style.is_transparent());
        }
    }
}
