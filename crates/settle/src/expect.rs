//! Fluent expectations over locators.
//!
//! `expect(locator).to_be_visible(&driver).await?` polls the matching state
//! predicate through [`wait_until`] and fails with a [`SettleError::Timeout`](crate::SettleError::Timeout)
//! whose message names the locator's chaining history.

use crate::driver::Driver;
use crate::locator::Locator;
use crate::predicates::{self, PredicateOptions};
use crate::result::SettleResult;
use crate::wait::{wait_until, WaitOptions};

/// Assertion builder for a locator
#[derive(Debug, Clone)]
pub struct Expect {
    locator: Locator,
    options: WaitOptions,
}

/// Create an expectation for a locator
#[must_use]
pub fn expect(locator: Locator) -> Expect {
    Expect::new(locator)
}

macro_rules! first_match_assertion {
    ($(#[$doc:meta])* $name:ident => $predicate:ident, $condition:literal) => {
        $(#[$doc])*
        pub async fn $name<D: Driver>(&self, driver: &D) -> SettleResult<()> {
            let verbose = self.predicate_options();
            let locator = &self.locator;
            self.check(
                move || async move {
                    let handle = locator.handle(driver).await?;
                    predicates::$predicate(driver, handle.as_ref(), &verbose).await
                },
                $condition.to_string(),
            )
            .await
        }
    };
    ($(#[$doc:meta])* $name:ident($arg:ident) => $predicate:ident, $condition:literal) => {
        $(#[$doc])*
        pub async fn $name<D: Driver>(&self, driver: &D, $arg: &str) -> SettleResult<()> {
            let verbose = self.predicate_options();
            let locator = &self.locator;
            self.check(
                move || async move {
                    let handle = locator.handle(driver).await?;
                    predicates::$predicate(driver, handle.as_ref(), $arg, &verbose).await
                },
                format!("{} '{}'", $condition, $arg),
            )
            .await
        }
    };
}

impl Expect {
    /// Create a new expectation with default wait options
    #[must_use]
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            options: WaitOptions::default(),
        }
    }

    /// Use these wait options; `throw_on_timeout` is always forced on
    #[must_use]
    pub fn with_options(mut self, options: WaitOptions) -> Self {
        self.options = options;
        self
    }

    /// The locator under test
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    fn predicate_options(&self) -> PredicateOptions {
        PredicateOptions::new().with_verbose(self.options.verbose)
    }

    fn failure(&self, condition: &str) -> String {
        format!("Expected '{}' to {condition}", self.locator)
    }

    async fn check<F, Fut>(&self, predicate: F, condition: String) -> SettleResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = SettleResult<bool>>,
    {
        let options = self.options.clone().with_throw_on_timeout(true);
        wait_until(predicate, &self.failure(&condition), &options).await?;
        Ok(())
    }

    /// Assert at least one element matches
    pub async fn to_exist<D: Driver>(&self, driver: &D) -> SettleResult<()> {
        let locator = &self.locator;
        self.check(move || locator.exists(driver), "exist".to_string())
            .await
    }

    /// Assert no element matches
    pub async fn to_not_exist<D: Driver>(&self, driver: &D) -> SettleResult<()> {
        let locator = &self.locator;
        self.check(move || locator.does_not_exist(driver), "not exist".to_string())
            .await
    }

    /// Assert exactly `count` elements match
    pub async fn to_have_count<D: Driver>(&self, driver: &D, count: usize) -> SettleResult<()> {
        let locator = &self.locator;
        self.check(
            move || async move { Ok(locator.count(driver).await? == count) },
            format!("have count {count}"),
        )
        .await
    }

    /// Assert the first match has attribute `name` set to `value`
    pub async fn to_have_attribute<D: Driver>(
        &self,
        driver: &D,
        name: &str,
        value: &str,
    ) -> SettleResult<()> {
        let verbose = self.predicate_options();
        let locator = &self.locator;
        self.check(
            move || async move {
                let handle = locator.handle(driver).await?;
                predicates::has_attribute_with_value(driver, handle.as_ref(), name, value, &verbose)
                    .await
            },
            format!("have attribute '{name}' with value '{value}'"),
        )
        .await
    }

    first_match_assertion!(
        /// Assert the first match is visible
        to_be_visible => is_visible, "be visible"
    );
    first_match_assertion!(
        /// Assert nothing matches or the first match is hidden
        to_be_hidden => is_not_visible, "be hidden"
    );
    first_match_assertion!(
        /// Assert the first match is visible inside the viewport
        to_be_visible_in_viewport => is_visible_in_viewport, "be visible in viewport"
    );
    first_match_assertion!(
        /// Assert the first match is enabled
        to_be_enabled => is_enabled, "be enabled"
    );
    first_match_assertion!(
        /// Assert the first match is disabled
        to_be_disabled => is_disabled, "be disabled"
    );
    first_match_assertion!(
        /// Assert the first match is checked
        to_be_checked => is_checked, "be checked"
    );
    first_match_assertion!(
        /// Assert the first match is unchecked
        to_be_unchecked => is_unchecked, "be unchecked"
    );
    first_match_assertion!(
        /// Assert the first match's text contains `text`
        to_have_text(text) => has_text, "have text"
    );
    first_match_assertion!(
        /// Assert the first match's text is exactly `text`
        to_have_exact_text(text) => has_exact_text, "have exact text"
    );
    first_match_assertion!(
        /// Assert the first match's value contains `value`
        to_have_value(value) => has_value, "have value"
    );
    first_match_assertion!(
        /// Assert the first match has class `class`
        to_have_class(class) => has_class, "have class"
    );
}
