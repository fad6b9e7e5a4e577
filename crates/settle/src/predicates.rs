//! Handle-level state predicates.
//!
//! Every predicate takes an optional handle: an absent element answers
//! `false` to positive questions and `true` to negated ones. An element that
//! detaches while it is being inspected answers like an absent one, with a
//! warning, so a predicate running inside [`wait_until`](crate::wait_until)
//! never aborts the wait because the page re-rendered.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::driver::{decode, ClientRect, ComputedStyle, Driver, Probe};
use crate::result::SettleResult;

/// Delay between the two bounding box samples of [`is_moving`]
pub const MOVING_SAMPLE_INTERVAL_MS: u64 = 50;

/// Largest coordinate change still considered "not moving", in CSS pixels
pub const MOVING_EPSILON: f64 = 0.01;

/// Options shared by every predicate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredicateOptions {
    /// Report each decision at `info` level
    pub verbose: bool,
}

impl PredicateOptions {
    /// Create new predicate options with defaults
    #[must_use]
    pub const fn new() -> Self {
        Self { verbose: false }
    }

    /// Enable verbose reporting
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Fold detachment into `fallback`, propagate any other error
fn settle_detached<T>(
    result: SettleResult<T>,
    fallback: T,
    what: &str,
    options: &PredicateOptions,
) -> SettleResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_detachment() => {
            warn!(error = %e, predicate = what, "element detached while checking");
            if options.verbose {
                info!(predicate = what, "treating detached element as absent");
            }
            Ok(fallback)
        }
        Err(e) => Err(e),
    }
}

fn report(what: &str, outcome: bool, options: &PredicateOptions) -> bool {
    if options.verbose {
        info!(predicate = what, outcome, "predicate evaluated");
    }
    outcome
}

async fn probe<D: Driver, T: serde::de::DeserializeOwned>(
    driver: &D,
    handle: &D::Handle,
    probe: &Probe,
) -> SettleResult<T> {
    decode(driver.evaluate(handle, probe).await?)
}

async fn style_and_box<D: Driver>(
    driver: &D,
    handle: &D::Handle,
) -> SettleResult<(ComputedStyle, ClientRect)> {
    let style: ComputedStyle = probe(driver, handle, &Probe::ComputedStyle).await?;
    let rect = driver.bounding_box(handle).await?;
    Ok((style, rect))
}

async fn check_visible<D: Driver>(driver: &D, handle: &D::Handle) -> SettleResult<bool> {
    let (style, rect) = style_and_box(driver, handle).await?;
    if style.is_transparent() || style.is_hidden() || style.is_not_displayed() {
        return Ok(false);
    }
    if rect.is_empty() {
        return Ok(false);
    }
    // absolutely positioned and parked wholly past the page origin
    if style.is_absolute() && (rect.bottom() < 0.0 || rect.right() < 0.0) {
        return Ok(false);
    }
    Ok(true)
}

async fn check_visible_in_viewport<D: Driver>(
    driver: &D,
    handle: &D::Handle,
) -> SettleResult<bool> {
    let ratio = driver.intersection_ratio(handle).await?;
    if ratio <= 0.0 {
        return Ok(false);
    }
    let (style, rect) = style_and_box(driver, handle).await?;
    Ok(!(style.is_transparent() || style.is_hidden() || style.is_not_displayed() || rect.is_empty()))
}

async fn sample_moving<D: Driver>(driver: &D, handle: &D::Handle) -> SettleResult<bool> {
    let before = driver.bounding_box(handle).await?;
    tokio::time::sleep(Duration::from_millis(MOVING_SAMPLE_INTERVAL_MS)).await;
    let after = driver.bounding_box(handle).await?;
    Ok(before.differs_from(&after, MOVING_EPSILON))
}

// =============================================================================
// VISIBILITY
// =============================================================================

/// Visible: some opacity, not hidden, displayed, a non-empty box, and not an
/// absolutely positioned element parked entirely above or left of the page
pub async fn is_visible<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report("is_visible", false, options));
    };
    let checked = check_visible(driver, handle).await;
    let outcome = settle_detached(checked, false, "is_visible", options)?;
    Ok(report("is_visible", outcome, options))
}

/// Negation of [`is_visible`]
pub async fn is_not_visible<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    Ok(!is_visible(driver, handle, options).await?)
}

/// Visible and at least partly inside the viewport
pub async fn is_visible_in_viewport<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report("is_visible_in_viewport", false, options));
    };
    let checked = check_visible_in_viewport(driver, handle).await;
    let outcome = settle_detached(checked, false, "is_visible_in_viewport", options)?;
    Ok(report("is_visible_in_viewport", outcome, options))
}

/// Negation of [`is_visible_in_viewport`]
pub async fn is_not_visible_in_viewport<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    Ok(!is_visible_in_viewport(driver, handle, options).await?)
}

/// Two bounding box samples [`MOVING_SAMPLE_INTERVAL_MS`] apart differ
pub async fn is_moving<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report("is_moving", false, options));
    };
    let sampled = sample_moving(driver, handle).await;
    let outcome = settle_detached(sampled, false, "is_moving", options)?;
    Ok(report("is_moving", outcome, options))
}

// =============================================================================
// FORM STATE
// =============================================================================

// Present-element flag; absent or detached is false whichever way it's asked.
async fn flag<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    flag: Probe,
    expected: bool,
    what: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report(what, false, options));
    };
    let actual = probe::<D, bool>(driver, handle, &flag)
        .await
        .map(|actual| actual == expected);
    let outcome = settle_detached(actual, false, what, options)?;
    Ok(report(what, outcome, options))
}

/// Not disabled
pub async fn is_enabled<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    flag(driver, handle, Probe::Disabled, false, "is_enabled", options).await
}

/// Disabled
pub async fn is_disabled<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    flag(driver, handle, Probe::Disabled, true, "is_disabled", options).await
}

/// Read-only
pub async fn is_read_only<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    flag(driver, handle, Probe::ReadOnly, true, "is_read_only", options).await
}

/// Present and editable
pub async fn is_not_read_only<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    flag(driver, handle, Probe::ReadOnly, false, "is_not_read_only", options).await
}

/// Checked
pub async fn is_checked<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    flag(driver, handle, Probe::Checked, true, "is_checked", options).await
}

/// Present and unchecked
pub async fn is_unchecked<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    flag(driver, handle, Probe::Checked, false, "is_unchecked", options).await
}

// =============================================================================
// CONTENT
// =============================================================================

async fn string_matches<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    source: Probe,
    what: &str,
    options: &PredicateOptions,
    matches: impl FnOnce(String) -> bool + Send,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report(what, false, options));
    };
    let actual = probe::<D, Option<String>>(driver, handle, &source)
        .await
        .map(|actual| matches(actual.unwrap_or_default()));
    let outcome = settle_detached(actual, false, what, options)?;
    Ok(report(what, outcome, options))
}

/// Trimmed inner text contains `text`
pub async fn has_text<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    text: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    string_matches(driver, handle, Probe::InnerText, "has_text", options, |actual| {
        actual.trim().contains(text)
    })
    .await
}

/// Inner text equals `text`, surrounding whitespace included
pub async fn has_exact_text<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    text: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    string_matches(driver, handle, Probe::InnerText, "has_exact_text", options, |actual| {
        actual == text
    })
    .await
}

/// Value contains `value`; a missing value counts as empty
pub async fn has_value<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    value: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    string_matches(driver, handle, Probe::Value, "has_value", options, |actual| {
        actual.contains(value)
    })
    .await
}

/// Attribute `name` is present and equals `value`
pub async fn has_attribute_with_value<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    name: &str,
    value: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report("has_attribute_with_value", false, options));
    };
    let actual = probe::<D, Option<String>>(driver, handle, &Probe::Attribute(name.to_string()))
        .await
        .map(|actual| actual.as_deref() == Some(value));
    let outcome = settle_detached(actual, false, "has_attribute_with_value", options)?;
    Ok(report("has_attribute_with_value", outcome, options))
}

/// `classList` contains `class`
pub async fn has_class<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    class: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    let Some(handle) = handle else {
        return Ok(report("has_class", false, options));
    };
    let actual = probe::<D, Vec<String>>(driver, handle, &Probe::ClassList)
        .await
        .map(|classes| classes.iter().any(|c| c == class));
    let outcome = settle_detached(actual, false, "has_class", options)?;
    Ok(report("has_class", outcome, options))
}

/// Negation of [`has_class`]; an absent element has no class
pub async fn does_not_have_class<D: Driver>(
    driver: &D,
    handle: Option<&D::Handle>,
    class: &str,
    options: &PredicateOptions,
) -> SettleResult<bool> {
    Ok(!has_class(driver, handle, class, options).await?)
}
