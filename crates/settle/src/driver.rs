//! Driver capability interface.
//!
//! Everything settle knows about a live page goes through [`Driver`]. The
//! trait covers CSS queries, structural navigation, a closed
//! set of side-effect-free [`Probe`] evaluations and geometry. Anything that
//! mutates the page (clicks, typing, navigation) lives outside this crate.
//!
//! # Implementations
//!
//! - [`MockDriver`](crate::MockDriver) - in-memory document for unit tests
//! - `CdpDriver` - chromiumoxide page (feature `browser`)

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::result::{SettleError, SettleResult};

/// A point in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Client rectangle of an element, as returned by `getBoundingClientRect()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRect {
    /// Distance from the viewport top
    pub top: f64,
    /// Distance from the viewport left edge
    pub left: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl ClientRect {
    /// Create a new rectangle
    #[must_use]
    pub const fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    /// Bottom edge
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Right edge
    #[must_use]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Center point
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// Vertically centered point on the left edge
    #[must_use]
    pub fn left_center(&self) -> Point {
        Point::new(self.left, self.top + self.height / 2.0)
    }

    /// Vertically centered point on the right edge
    #[must_use]
    pub fn right_center(&self) -> Point {
        Point::new(self.right(), self.top + self.height / 2.0)
    }

    /// Check if a point is inside this rectangle (edges included)
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.left
            && point.x <= self.right()
            && point.y >= self.top
            && point.y <= self.bottom()
    }

    /// True when width or height is zero
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True if any coordinate differs from `other` by more than `epsilon`
    #[must_use]
    pub fn differs_from(&self, other: &Self, epsilon: f64) -> bool {
        (self.top - other.top).abs() > epsilon
            || (self.left - other.left).abs() > epsilon
            || (self.width - other.width).abs() > epsilon
            || (self.height - other.height).abs() > epsilon
    }

    /// Area of the overlap with `other`, 0 when disjoint
    #[must_use]
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = self.right().min(other.right()) - self.left.max(other.left);
        let h = self.bottom().min(other.bottom()) - self.top.max(other.top);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }
}

/// The subset of `getComputedStyle()` the visibility predicates need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedStyle {
    /// CSS `opacity`, as the browser reports it (e.g. `"1"`, `"0.5"`)
    pub opacity: String,
    /// CSS `visibility`
    pub visibility: String,
    /// CSS `display`
    pub display: String,
    /// CSS `position`
    pub position: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            opacity: "1".to_string(),
            visibility: "visible".to_string(),
            display: "block".to_string(),
            position: "static".to_string(),
        }
    }
}

impl ComputedStyle {
    /// Zero opacity
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.opacity
            .trim()
            .parse::<f64>()
            .is_ok_and(|opacity| opacity <= 0.0)
    }

    /// `visibility: hidden` or `visibility: collapse`
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        matches!(self.visibility.as_str(), "hidden" | "collapse")
    }

    /// `display: none`
    #[must_use]
    pub fn is_not_displayed(&self) -> bool {
        self.display == "none"
    }

    /// `position: absolute`
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.position == "absolute"
    }
}

/// One `<option>` of a `<select>` element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Option value
    pub value: String,
    /// Option label (its inner text)
    pub label: String,
    /// Whether the option is currently selected
    pub selected: bool,
}

/// Side-effect-free extraction run against a live element.
///
/// Each probe has a fixed JSON result shape, documented per variant, so
/// drivers can answer them natively (the mock) or via a JavaScript function
/// (CDP).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Probe {
    /// `innerText` - string
    InnerText,
    /// `value` property - string or null
    Value,
    /// `placeholder` attribute - string or null
    Placeholder,
    /// `aria-label` attribute - string or null
    AriaLabel,
    /// Any attribute - string or null
    Attribute(String),
    /// `classList` - array of strings
    ClassList,
    /// Computed style - [`ComputedStyle`] object
    ComputedStyle,
    /// `disabled` property - bool
    Disabled,
    /// `readOnly` property - bool
    ReadOnly,
    /// `checked` property - bool
    Checked,
    /// `<select>` options - array of [`SelectOption`]
    SelectOptions,
}

impl Probe {
    /// JavaScript function declaration evaluated with the element as `this`
    #[must_use]
    pub fn to_js(&self) -> String {
        match self {
            Self::InnerText => "function() { return this.innerText; }".to_string(),
            Self::Value => {
                "function() { return this.value === undefined ? null : this.value; }".to_string()
            }
            Self::Placeholder => {
                "function() { return this.getAttribute('placeholder'); }".to_string()
            }
            Self::AriaLabel => "function() { return this.getAttribute('aria-label'); }".to_string(),
            Self::Attribute(name) => {
                let quoted = serde_json::Value::String(name.clone());
                format!("function() {{ return this.getAttribute({quoted}); }}")
            }
            Self::ClassList => "function() { return Array.from(this.classList); }".to_string(),
            Self::ComputedStyle => "function() { \
                const s = window.getComputedStyle(this); \
                return { opacity: s.opacity, visibility: s.visibility, \
                         display: s.display, position: s.position }; }"
                .to_string(),
            Self::Disabled => "function() { return !!this.disabled; }".to_string(),
            Self::ReadOnly => "function() { return !!this.readOnly; }".to_string(),
            Self::Checked => "function() { return !!this.checked; }".to_string(),
            Self::SelectOptions => "function() { \
                if (!this.options) { return []; } \
                return Array.from(this.options).map(o => \
                    ({ value: o.value, label: o.label, selected: o.selected })); }"
                .to_string(),
        }
    }
}

/// Decode a probe result into a typed value
pub fn decode<T: DeserializeOwned>(value: serde_json::Value) -> SettleResult<T> {
    serde_json::from_value(value).map_err(SettleError::from)
}

/// Abstract driver trait for querying a live page.
///
/// Handles are opaque references into the page. Any method taking a handle
/// may fail with [`SettleError::Detached`] once the element has left the
/// document; callers decide whether that is a negative answer or an error.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opaque element reference
    type Handle: Clone + Send + Sync + std::fmt::Debug;

    /// All matches of `selector` in the current page or frame, document order
    async fn query_all(&self, selector: &str) -> SettleResult<Vec<Self::Handle>>;

    /// All matches of `selector` inside `handle`, document order
    async fn query_all_within(
        &self,
        handle: &Self::Handle,
        selector: &str,
    ) -> SettleResult<Vec<Self::Handle>>;

    /// Run a probe against the element
    async fn evaluate(&self, handle: &Self::Handle, probe: &Probe)
        -> SettleResult<serde_json::Value>;

    /// Parent element, if any
    async fn parent(&self, handle: &Self::Handle) -> SettleResult<Option<Self::Handle>>;

    /// Next element sibling, if any
    async fn next_sibling(&self, handle: &Self::Handle) -> SettleResult<Option<Self::Handle>>;

    /// Previous element sibling, if any
    async fn previous_sibling(&self, handle: &Self::Handle)
        -> SettleResult<Option<Self::Handle>>;

    /// Current client rectangle
    async fn bounding_box(&self, handle: &Self::Handle) -> SettleResult<ClientRect>;

    /// Fraction of the element's box inside the viewport, in `[0, 1]`
    async fn intersection_ratio(&self, handle: &Self::Handle) -> SettleResult<f64>;
}
