//! Lazy locator for element selection.
//!
//! A [`Locator`] is a description, not a result: the list of [`QueryStep`]s
//! that lead from a CSS selector to a set of elements, plus a human-readable
//! chaining history. Building one never touches the page; every terminal
//! operation replays the whole chain against the driver it is given, so a
//! locator created before the page exists, or kept across re-renders, always
//! answers about the document as it is now.
//!
//! # Design Philosophy
//!
//! - **Replayable**: steps are pure descriptors, nothing is cached
//! - **Absence is not an error**: an empty match answers `None`/`false`
//! - **Diagnosable**: the chaining history is embedded in every failure
//!
//! ```
//! use settle::Locator;
//!
//! let checkboxes = Locator::new("[role=\"row\"]").find("input[type=checkbox]");
//! assert_eq!(
//!     checkboxes.to_string(),
//!     "selector([role=\"row\"])\n  .find(input[type=checkbox])"
//! );
//! ```

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::driver::{decode, ClientRect, Driver, Point, Probe, SelectOption};
use crate::predicates::{self, PredicateOptions};
use crate::query::QueryStep;
use crate::result::{SettleError, SettleResult};
use crate::wait::{wait_until, WaitOptions};

/// Serializable form of a [`Locator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorState {
    /// Steps in chain order
    #[serde(rename = "actions")]
    pub steps: Vec<QueryStep>,
    /// Chaining history
    #[serde(rename = "chainingHistory")]
    pub history: String,
}

/// Lazy, replayable element locator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    steps: Vec<QueryStep>,
    history: String,
}

// =============================================================================
// CHAIN BUILDERS
// =============================================================================

impl Locator {
    /// Locator for every match of a CSS selector in the page
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        let step = QueryStep::RootQuery {
            selector: selector.into(),
        };
        Self {
            history: step.history_line(),
            steps: vec![step],
        }
    }

    fn derive(&self, step: QueryStep) -> Self {
        let mut history = self.history.clone();
        history.push_str(&step.history_line());
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps, history }
    }

    /// Matches of `selector` inside each current match
    #[must_use]
    pub fn find(&self, selector: impl Into<String>) -> Self {
        self.derive(QueryStep::SubQuery {
            selector: selector.into(),
        })
    }

    /// Keep matches whose trimmed inner text contains `text`
    #[must_use]
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        self.derive(QueryStep::FilterByText { text: text.into() })
    }

    /// Keep matches whose inner text is exactly `text`, surrounding
    /// whitespace included
    #[must_use]
    pub fn with_exact_text(&self, text: impl Into<String>) -> Self {
        self.derive(QueryStep::FilterByExactText { text: text.into() })
    }

    /// Keep matches whose value contains `text`
    #[must_use]
    pub fn with_value(&self, text: impl Into<String>) -> Self {
        self.derive(QueryStep::FilterByValue { text: text.into() })
    }

    /// Keep matches whose placeholder contains `text`
    #[must_use]
    pub fn with_placeholder(&self, text: impl Into<String>) -> Self {
        self.derive(QueryStep::FilterByPlaceholder { text: text.into() })
    }

    /// Keep matches whose aria-label is exactly `text`
    #[must_use]
    pub fn with_aria_label(&self, text: impl Into<String>) -> Self {
        self.derive(QueryStep::FilterByAriaLabel { text: text.into() })
    }

    /// Parent of each match
    #[must_use]
    pub fn parent(&self) -> Self {
        self.derive(QueryStep::Parent)
    }

    /// Next element sibling of each match
    #[must_use]
    pub fn next_sibling(&self) -> Self {
        self.derive(QueryStep::NextSibling)
    }

    /// Previous element sibling of each match
    #[must_use]
    pub fn previous_sibling(&self) -> Self {
        self.derive(QueryStep::PreviousSibling)
    }

    /// The match at a one-based position; negative counts from the end
    #[must_use]
    pub fn nth(&self, index: i64) -> Self {
        self.derive(QueryStep::Nth { index })
    }

    /// Steps in chain order
    #[must_use]
    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    /// Chaining history, one line per step
    #[must_use]
    pub fn history(&self) -> &str {
        &self.history
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

impl Locator {
    /// Snapshot the steps and history
    #[must_use]
    pub fn state(&self) -> LocatorState {
        LocatorState {
            steps: self.steps.clone(),
            history: self.history.clone(),
        }
    }

    /// Rebuild a locator from a snapshot.
    ///
    /// # Errors
    ///
    /// [`SettleError::InvalidState`] when the state has no steps or does not
    /// start with a root query.
    pub fn from_state(state: LocatorState) -> SettleResult<Self> {
        match state.steps.first() {
            Some(QueryStep::RootQuery { .. }) => {}
            Some(other) => {
                return Err(SettleError::InvalidState {
                    message: format!("locator must start with a root query, found {other:?}"),
                })
            }
            None => {
                return Err(SettleError::InvalidState {
                    message: "locator has no steps".to_string(),
                })
            }
        }
        if let Some(position) = state
            .steps
            .iter()
            .skip(1)
            .position(|step| matches!(step, QueryStep::RootQuery { .. }))
        {
            return Err(SettleError::InvalidState {
                message: format!("root query found at step {}", position + 2),
            });
        }
        Ok(Self {
            steps: state.steps,
            history: state.history,
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> SettleResult<String> {
        Ok(serde_json::to_string(&self.state())?)
    }

    /// Deserialize from JSON produced by [`Locator::to_json`]
    pub fn from_json(json: &str) -> SettleResult<Self> {
        Self::from_state(serde_json::from_str(json)?)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.history)
    }
}

// =============================================================================
// MATERIALIZATION
// =============================================================================

impl Locator {
    /// Replay the chain and return every match, in order
    pub async fn all_handles<D: Driver>(&self, driver: &D) -> SettleResult<Vec<D::Handle>> {
        let mut handles = Vec::new();
        for step in &self.steps {
            handles = step.apply(driver, handles).await?;
        }
        trace!(locator = %self.history, matches = handles.len(), "locator materialized");
        Ok(handles)
    }

    /// First match, if any
    pub async fn handle<D: Driver>(&self, driver: &D) -> SettleResult<Option<D::Handle>> {
        Ok(self.all_handles(driver).await?.into_iter().next())
    }

    /// Number of matches
    pub async fn count<D: Driver>(&self, driver: &D) -> SettleResult<usize> {
        Ok(self.all_handles(driver).await?.len())
    }

    /// At least one match
    pub async fn exists<D: Driver>(&self, driver: &D) -> SettleResult<bool> {
        Ok(self.count(driver).await? > 0)
    }

    /// No match
    pub async fn does_not_exist<D: Driver>(&self, driver: &D) -> SettleResult<bool> {
        Ok(self.count(driver).await? == 0)
    }

    /// Call `f(self.nth(i), i)` for `i` in `1..=count`.
    ///
    /// The count is taken once up front and each element is re-derived by
    /// position, so if the page gains or loses matches mid-iteration an
    /// element can be skipped or visited twice.
    pub async fn for_each<D, F, Fut>(&self, driver: &D, mut f: F) -> SettleResult<()>
    where
        D: Driver,
        F: FnMut(Self, usize) -> Fut,
        Fut: Future<Output = SettleResult<()>>,
    {
        let count = self.count(driver).await?;
        for i in 1..=count {
            let index = i64::try_from(i).map_err(|_| SettleError::InvalidState {
                message: format!("position {i} does not fit in a signed index"),
            })?;
            f(self.nth(index), i).await?;
        }
        Ok(())
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

impl Locator {
    async fn probe_first<D: Driver, T: DeserializeOwned>(
        &self,
        driver: &D,
        probe: Probe,
    ) -> SettleResult<Option<T>> {
        let Some(handle) = self.handle(driver).await? else {
            return Ok(None);
        };
        match driver.evaluate(&handle, &probe).await {
            Ok(value) => decode(value).map(Some),
            Err(e) if e.is_detachment() => {
                debug!(error = %e, locator = %self.history, "first match detached");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Inner text of the first match
    pub async fn inner_text<D: Driver>(&self, driver: &D) -> SettleResult<Option<String>> {
        Ok(self
            .probe_first::<D, Option<String>>(driver, Probe::InnerText)
            .await?
            .flatten())
    }

    /// Value of the first match
    pub async fn value<D: Driver>(&self, driver: &D) -> SettleResult<Option<String>> {
        Ok(self
            .probe_first::<D, Option<String>>(driver, Probe::Value)
            .await?
            .flatten())
    }

    /// Classes of the first match
    pub async fn class_list<D: Driver>(&self, driver: &D) -> SettleResult<Option<Vec<String>>> {
        self.probe_first(driver, Probe::ClassList).await
    }

    /// Attribute of the first match
    pub async fn attribute<D: Driver>(
        &self,
        driver: &D,
        name: &str,
    ) -> SettleResult<Option<String>> {
        Ok(self
            .probe_first::<D, Option<String>>(driver, Probe::Attribute(name.to_string()))
            .await?
            .flatten())
    }

    /// Placeholder of the first match
    pub async fn placeholder<D: Driver>(&self, driver: &D) -> SettleResult<Option<String>> {
        Ok(self
            .probe_first::<D, Option<String>>(driver, Probe::Placeholder)
            .await?
            .flatten())
    }

    /// Client rectangle of the first match
    pub async fn client_rectangle<D: Driver>(&self, driver: &D) -> SettleResult<Option<ClientRect>> {
        let Some(handle) = self.handle(driver).await? else {
            return Ok(None);
        };
        match driver.bounding_box(&handle).await {
            Ok(rect) => Ok(Some(rect)),
            Err(e) if e.is_detachment() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Center of the first match
    pub async fn position<D: Driver>(&self, driver: &D) -> SettleResult<Option<Point>> {
        Ok(self.client_rectangle(driver).await?.map(|r| r.center()))
    }

    /// Middle of the left edge of the first match
    pub async fn left_position<D: Driver>(&self, driver: &D) -> SettleResult<Option<Point>> {
        Ok(self.client_rectangle(driver).await?.map(|r| r.left_center()))
    }

    /// Middle of the right edge of the first match
    pub async fn right_position<D: Driver>(&self, driver: &D) -> SettleResult<Option<Point>> {
        Ok(self.client_rectangle(driver).await?.map(|r| r.right_center()))
    }

    /// Options of the first match (a `<select>`); empty when absent
    pub async fn options<D: Driver>(&self, driver: &D) -> SettleResult<Vec<SelectOption>> {
        Ok(self
            .probe_first(driver, Probe::SelectOptions)
            .await?
            .unwrap_or_default())
    }

    /// Selected options of the first match
    pub async fn selected_options<D: Driver>(&self, driver: &D) -> SettleResult<Vec<SelectOption>> {
        let mut options = self.options(driver).await?;
        options.retain(|option| option.selected);
        Ok(options)
    }

    /// First selected option of the first match
    pub async fn selected_option<D: Driver>(&self, driver: &D) -> SettleResult<Option<SelectOption>> {
        Ok(self.selected_options(driver).await?.into_iter().next())
    }
}

// =============================================================================
// PREDICATES (first match)
// =============================================================================

macro_rules! first_match_predicate {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub async fn $name<D: Driver>(&self, driver: &D) -> SettleResult<bool> {
            let handle = self.handle(driver).await?;
            predicates::$name(driver, handle.as_ref(), &PredicateOptions::default()).await
        }
    };
    ($(#[$doc:meta])* $name:ident($arg:ident)) => {
        $(#[$doc])*
        pub async fn $name<D: Driver>(&self, driver: &D, $arg: &str) -> SettleResult<bool> {
            let handle = self.handle(driver).await?;
            predicates::$name(driver, handle.as_ref(), $arg, &PredicateOptions::default()).await
        }
    };
}

impl Locator {
    first_match_predicate!(
        /// First match is visible
        is_visible
    );
    first_match_predicate!(
        /// No match, or the first match is not visible
        is_not_visible
    );
    first_match_predicate!(
        /// First match is visible inside the viewport
        is_visible_in_viewport
    );
    first_match_predicate!(
        /// No match, or the first match is outside the viewport
        is_not_visible_in_viewport
    );
    first_match_predicate!(
        /// First match changes position over 50ms
        is_moving
    );
    first_match_predicate!(
        /// First match is enabled
        is_enabled
    );
    first_match_predicate!(
        /// First match is disabled
        is_disabled
    );
    first_match_predicate!(
        /// First match is read-only
        is_read_only
    );
    first_match_predicate!(
        /// First match is editable
        is_not_read_only
    );
    first_match_predicate!(
        /// First match is checked
        is_checked
    );
    first_match_predicate!(
        /// First match is unchecked
        is_unchecked
    );
    first_match_predicate!(
        /// First match's trimmed inner text contains `text`
        has_text(text)
    );
    first_match_predicate!(
        /// First match's trimmed inner text equals `text`
        has_exact_text(text)
    );
    first_match_predicate!(
        /// First match's value contains `value`
        has_value(value)
    );
    first_match_predicate!(
        /// First match has class `class`
        has_class(class)
    );
    first_match_predicate!(
        /// No match, or the first match lacks class `class`
        does_not_have_class(class)
    );

    /// First match has attribute `name` set to `value`
    pub async fn has_attribute_with_value<D: Driver>(
        &self,
        driver: &D,
        name: &str,
        value: &str,
    ) -> SettleResult<bool> {
        let handle = self.handle(driver).await?;
        predicates::has_attribute_with_value(
            driver,
            handle.as_ref(),
            name,
            value,
            &PredicateOptions::default(),
        )
        .await
    }
}

// =============================================================================
// WAITS
// =============================================================================

impl Locator {
    /// Message used when a required element never shows up
    #[must_use]
    pub fn not_found_message(&self) -> String {
        format!("Cannot find '{}' because this selector was not found in DOM", self.history)
    }

    /// Wait until at least one element matches
    pub async fn wait_until_exists<D: Driver>(
        &self,
        driver: &D,
        options: &WaitOptions,
    ) -> SettleResult<bool> {
        wait_until(move || self.exists(driver), &self.not_found_message(), options).await
    }

    /// Wait until the first match is visible
    pub async fn wait_until_visible<D: Driver>(
        &self,
        driver: &D,
        options: &WaitOptions,
    ) -> SettleResult<bool> {
        let verbose = PredicateOptions::new().with_verbose(options.verbose);
        let message = format!("Selector '{}' is not visible", self.history);
        wait_until(
            move || async move {
                let handle = self.handle(driver).await?;
                predicates::is_visible(driver, handle.as_ref(), &verbose).await
            },
            &message,
            options,
        )
        .await
    }

    /// Wait until nothing matches or the first match is hidden
    pub async fn wait_until_not_visible<D: Driver>(
        &self,
        driver: &D,
        options: &WaitOptions,
    ) -> SettleResult<bool> {
        let verbose = PredicateOptions::new().with_verbose(options.verbose);
        let message = format!("Selector '{}' is still visible", self.history);
        wait_until(
            move || async move {
                let handle = self.handle(driver).await?;
                predicates::is_not_visible(driver, handle.as_ref(), &verbose).await
            },
            &message,
            options,
        )
        .await
    }

    /// Wait until the first match exists and stops moving
    pub async fn wait_until_stable<D: Driver>(
        &self,
        driver: &D,
        options: &WaitOptions,
    ) -> SettleResult<bool> {
        let verbose = PredicateOptions::new().with_verbose(options.verbose);
        let message = format!("Selector '{}' is still moving", self.history);
        wait_until(
            move || async move {
                match self.handle(driver).await? {
                    Some(handle) => predicates::is_moving(driver, Some(&handle), &verbose)
                        .await
                        .map(|moving| !moving),
                    None => Ok(false),
                }
            },
            &message,
            options,
        )
        .await
    }

    /// Wait for the first match and return it.
    ///
    /// # Errors
    ///
    /// [`SettleError::Timeout`] carrying [`Locator::not_found_message`] when
    /// no element shows up in time, whatever `throw_on_timeout` says.
    pub async fn wait_for_handle<D: Driver>(
        &self,
        driver: &D,
        options: &WaitOptions,
    ) -> SettleResult<D::Handle> {
        let options = options.clone().with_throw_on_timeout(true);
        self.wait_until_exists(driver, &options).await?;
        self.handle(driver).await?.ok_or_else(|| SettleError::Timeout {
            message: self.not_found_message(),
            ms: options.timeout_ms,
        })
    }
}
