//! Settle: lazy locators and stability-based waits for live pages
//!
//! End-to-end UI tests race a document that keeps changing under them.
//! Settle answers "is this true yet, and will it stay true?" with two
//! pieces:
//!
//! - [`Locator`]: a replayable description of which elements to find and
//!   how. Building one does no I/O; every terminal call re-walks the chain
//!   against the live page, so it never holds on to stale elements.
//! - [`wait_until`]: a poller that only reports success once a predicate
//!   has held continuously for a stability window.
//!
//! Everything talks to the page through the [`Driver`] trait. [`MockDriver`]
//! is an in-memory page for unit tests; `CdpDriver` (feature `browser`)
//! drives Chromium through chromiumoxide.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   steps    ┌───────────┐  queries/probes  ┌──────────┐
//! │ Locator  │──────────►│ QueryStep │────────────────►│  Driver  │
//! └────┬─────┘            └───────────┘                  └──────────┘
//!      │ predicates / expect
//!      ▼
//! ┌──────────┐
//! │wait_until│  stability window, timeout, try-catch wrapping
//! └──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use settle::{expect, Locator, MockDocument, MockDriver, MockElement, WaitOptions};
//!
//! # tokio_test_block(async {
//! let mut doc = MockDocument::new();
//! let row = doc.append(doc.body(), MockElement::new("div").with_attr("role", "row"));
//! doc.append(row, MockElement::new("input").with_attr("type", "checkbox"));
//! let driver = MockDriver::from_document(doc);
//!
//! let checkbox = Locator::new("[role=\"row\"]").find("input[type=checkbox]");
//! assert_eq!(checkbox.count(&driver).await.unwrap(), 1);
//! expect(checkbox)
//!     .with_options(WaitOptions::new().with_stability(0))
//!     .to_be_unchecked(&driver)
//!     .await
//!     .unwrap();
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread()
//! #         .enable_time()
//! #         .build()
//! #         .unwrap()
//! #         .block_on(f)
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

#[cfg(feature = "browser")]
mod browser;
mod driver;
mod expect;
mod locator;
pub mod mock;
pub mod predicates;
mod query;
mod result;
pub mod wait;

#[cfg(feature = "browser")]
pub use browser::{CdpDriver, CdpHandle};
pub use driver::{decode, ClientRect, ComputedStyle, Driver, Point, Probe, SelectOption};
pub use expect::{expect, Expect};
pub use locator::{Locator, LocatorState};
pub use mock::{MockDocument, MockDriver, MockElement, MockHandle, NodeId, Viewport};
pub use predicates::PredicateOptions;
pub use query::{resolve_nth, validate_selector, QueryStep, MAX_SELECTOR_LENGTH};
pub use result::{SettleError, SettleResult};
pub use wait::{wait_until, wait_until_with_report, WaitOptions, WaitResult};
