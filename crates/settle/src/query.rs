//! Query step algebra.
//!
//! A [`QueryStep`] maps the current sequence of handles to a new one by asking
//! the driver. Steps never mutate the page, so a chain of them can be replayed
//! as often as needed; absence is always an empty sequence, never an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{decode, Driver, Probe};
use crate::result::{SettleError, SettleResult};

/// Longest selector accepted by root and sub queries (10 KiB)
pub const MAX_SELECTOR_LENGTH: usize = 10 * 1024;

/// Pseudo-classes that depend on live page state (pointer, focus, form
/// controls, history). The static selector grammar rejects them, so they are
/// swapped for a structural pseudo-class before the syntax check.
pub const DYNAMIC_PSEUDO_CLASSES: &[&str] = &[
    "active",
    "any-link",
    "autofill",
    "checked",
    "default",
    "disabled",
    "enabled",
    "focus",
    "focus-visible",
    "focus-within",
    "fullscreen",
    "hover",
    "in-range",
    "indeterminate",
    "invalid",
    "link",
    "optional",
    "out-of-range",
    "placeholder-shown",
    "read-only",
    "read-write",
    "required",
    "target",
    "valid",
    "visited",
];

/// Reject selectors no driver could ever resolve: empty, oversized or
/// syntactically malformed ones
pub fn validate_selector(selector: &str) -> SettleResult<()> {
    if selector.trim().is_empty() {
        return Err(SettleError::InvalidSelector {
            selector: selector.to_string(),
            reason: "selector is empty".to_string(),
        });
    }
    if selector.len() > MAX_SELECTOR_LENGTH {
        return Err(SettleError::InvalidSelector {
            selector: selector.chars().take(64).collect(),
            reason: format!(
                "selector is {} bytes long, the limit is {MAX_SELECTOR_LENGTH}",
                selector.len()
            ),
        });
    }
    let structural = without_dynamic_pseudo_classes(selector);
    scraper::Selector::parse(&structural).map_err(|e| SettleError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// First pseudo-class in `selector` that depends on live page state
#[must_use]
pub fn dynamic_pseudo_class(selector: &str) -> Option<&str> {
    pseudo_classes(selector)
        .into_iter()
        .map(|(start, end)| &selector[start..end])
        .find(|name| is_dynamic(name))
}

fn is_dynamic(name: &str) -> bool {
    DYNAMIC_PSEUDO_CLASSES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

fn without_dynamic_pseudo_classes(selector: &str) -> String {
    let mut out = String::with_capacity(selector.len());
    let mut copied = 0;
    for (start, end) in pseudo_classes(selector) {
        if is_dynamic(&selector[start..end]) {
            out.push_str(&selector[copied..start]);
            out.push_str("first-child");
            copied = end;
        }
    }
    out.push_str(&selector[copied..]);
    out
}

// Byte ranges of pseudo-class names (the part after a single ':') outside
// attribute brackets, quotes and escapes. Pseudo-elements are skipped.
fn pseudo_classes(selector: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut chars = selector.char_indices().peekable();
    let mut quote: Option<char> = None;
    let mut depth = 0_usize;
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (_, '\\') => {
                chars.next();
            }
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ':') if depth == 0 => {
                if chars.peek().is_some_and(|(_, next)| *next == ':') {
                    chars.next();
                    continue;
                }
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, next)) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '-' || next == '_') {
                        break;
                    }
                    end = j + next.len_utf8();
                    chars.next();
                }
                if end > start {
                    spans.push((start, end));
                }
            }
            _ => {}
        }
    }
    spans
}

/// One replayable step of a locator chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum QueryStep {
    /// All matches of a CSS selector in the page
    RootQuery {
        /// CSS selector
        selector: String,
    },
    /// All matches of a CSS selector inside each current handle
    SubQuery {
        /// CSS selector
        selector: String,
    },
    /// Keep handles whose trimmed inner text contains `text`
    FilterByText {
        /// Expected fragment
        text: String,
    },
    /// Keep handles whose inner text equals `text` exactly, surrounding
    /// whitespace included
    FilterByExactText {
        /// Expected text
        text: String,
    },
    /// Keep handles whose value contains `text`
    FilterByValue {
        /// Expected fragment
        text: String,
    },
    /// Keep handles whose placeholder contains `text`
    FilterByPlaceholder {
        /// Expected fragment
        text: String,
    },
    /// Keep handles whose aria-label equals `text`
    FilterByAriaLabel {
        /// Expected label
        text: String,
    },
    /// Keep the handle at a one-based signed position
    Nth {
        /// 1 is the first handle, -1 the last
        index: i64,
    },
    /// Replace each handle with its parent
    Parent,
    /// Replace each handle with its next element sibling
    NextSibling,
    /// Replace each handle with its previous element sibling
    PreviousSibling,
}

impl QueryStep {
    /// The line this step contributes to a chaining history
    #[must_use]
    pub fn history_line(&self) -> String {
        match self {
            Self::RootQuery { selector } => format!("selector({selector})"),
            Self::SubQuery { selector } => format!("\n  .find({selector})"),
            Self::FilterByText { text } => format!("\n  .withText({text})"),
            Self::FilterByExactText { text } => format!("\n  .withExactText({text})"),
            Self::FilterByValue { text } => format!("\n  .withValue({text})"),
            Self::FilterByPlaceholder { text } => format!("\n  .withPlaceholder({text})"),
            Self::FilterByAriaLabel { text } => format!("\n  .withAriaLabel({text})"),
            Self::Nth { index } => format!("\n  .nth({index})"),
            Self::Parent => "\n  .parent()".to_string(),
            Self::NextSibling => "\n  .nextSibling()".to_string(),
            Self::PreviousSibling => "\n  .previousSibling()".to_string(),
        }
    }

    /// Run this step against `handles`
    pub async fn apply<D: Driver>(
        &self,
        driver: &D,
        handles: Vec<D::Handle>,
    ) -> SettleResult<Vec<D::Handle>> {
        match self {
            Self::RootQuery { selector } => {
                validate_selector(selector)?;
                match driver.query_all(selector).await {
                    Ok(found) => Ok(found),
                    Err(e) if e.is_detachment() => {
                        debug!(error = %e, selector = %selector, "root query scope detached");
                        Ok(Vec::new())
                    }
                    Err(e) => Err(e),
                }
            }
            Self::SubQuery { selector } => {
                validate_selector(selector)?;
                let mut out = Vec::new();
                for handle in &handles {
                    match driver.query_all_within(handle, selector).await {
                        Ok(found) => out.extend(found),
                        Err(e) if e.is_detachment() => {
                            debug!(error = %e, selector = %selector, "sub query on detached handle");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(out)
            }
            Self::FilterByText { text } => {
                filter_by_string(driver, handles, &Probe::InnerText, |actual| {
                    actual.is_some_and(|t| t.trim().contains(text.as_str()))
                })
                .await
            }
            Self::FilterByExactText { text } => {
                filter_by_string(driver, handles, &Probe::InnerText, |actual| {
                    actual.unwrap_or_default() == *text
                })
                .await
            }
            Self::FilterByValue { text } => {
                filter_by_string(driver, handles, &Probe::Value, |actual| {
                    actual.unwrap_or_default().contains(text.as_str())
                })
                .await
            }
            Self::FilterByPlaceholder { text } => {
                filter_by_string(driver, handles, &Probe::Placeholder, |actual| {
                    actual.unwrap_or_default().contains(text.as_str())
                })
                .await
            }
            Self::FilterByAriaLabel { text } => {
                filter_by_string(driver, handles, &Probe::AriaLabel, |actual| {
                    actual.as_deref() == Some(text.as_str())
                })
                .await
            }
            Self::Nth { index } => Ok(resolve_nth(handles, *index)),
            Self::Parent => navigate(driver, handles, Relative::Parent).await,
            Self::NextSibling => navigate(driver, handles, Relative::NextSibling).await,
            Self::PreviousSibling => navigate(driver, handles, Relative::PreviousSibling).await,
        }
    }
}

/// Pick the element at a one-based signed position.
///
/// Zero and out-of-range positions select nothing.
#[must_use]
pub fn resolve_nth<T>(mut handles: Vec<T>, index: i64) -> Vec<T> {
    let len = handles.len();
    let position = match index {
        0 => None,
        i if i > 0 => usize::try_from(i - 1).ok().filter(|p| *p < len),
        i => usize::try_from(i.unsigned_abs())
            .ok()
            .and_then(|back| len.checked_sub(back)),
    };
    match position {
        Some(p) => vec![handles.swap_remove(p)],
        None => Vec::new(),
    }
}

async fn filter_by_string<D, F>(
    driver: &D,
    handles: Vec<D::Handle>,
    probe: &Probe,
    keep: F,
) -> SettleResult<Vec<D::Handle>>
where
    D: Driver,
    F: Fn(Option<String>) -> bool,
{
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let actual = match driver.evaluate(&handle, probe).await {
            Ok(value) => decode::<Option<String>>(value),
            Err(e) => Err(e),
        };
        match actual {
            Ok(actual) => {
                if keep(actual) {
                    out.push(handle);
                }
            }
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => debug!(error = %e, probe = ?probe, "filter dropped handle"),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
enum Relative {
    Parent,
    NextSibling,
    PreviousSibling,
}

async fn navigate<D: Driver>(
    driver: &D,
    handles: Vec<D::Handle>,
    relative: Relative,
) -> SettleResult<Vec<D::Handle>> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in &handles {
        let found = match relative {
            Relative::Parent => driver.parent(handle).await,
            Relative::NextSibling => driver.next_sibling(handle).await,
            Relative::PreviousSibling => driver.previous_sibling(handle).await,
        };
        match found {
            Ok(Some(h)) => out.push(h),
            Ok(None) => {}
            Err(e) if e.is_detachment() => {
                debug!(error = %e, relative = ?relative, "navigation from detached handle");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
