//! Chrome `DevTools` Protocol driver.
//!
//! [`CdpDriver`] attaches to a page opened elsewhere with chromiumoxide and
//! answers [`Driver`] calls over CDP. It does not launch or close browsers.
//!
//! Handles are `Runtime` remote object ids. Every read runs as
//! `Runtime.callFunctionOn` against the element: extractions come back by
//! value, structural navigation and scoped queries come back as new remote
//! objects, so the page itself is never written to.

use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::runtime::{
    CallFunctionOnParams, ExceptionDetails, GetPropertiesParams, ReleaseObjectParams,
    RemoteObject, RemoteObjectId,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page as CdpPage;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::driver::{decode, ClientRect, Driver, Probe};
use crate::result::{SettleError, SettleResult};

/// Thrown by the connection guard when a handle has left the document
const DETACHED_MESSAGE: &str = "Node is detached from document";

const BOUNDING_BOX_JS: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    return { top: r.top, left: r.left, width: r.width, height: r.height }; }";

const INTERSECTION_RATIO_JS: &str = "function() { \
    return new Promise(resolve => { \
        const observer = new IntersectionObserver(entries => { \
            resolve(entries[0].intersectionRatio); \
            observer.disconnect(); \
        }); \
        observer.observe(this); \
    }); }";

// CDP reports a vanished node through a handful of protocol messages
const DETACHED_MARKERS: [&str; 6] = [
    "No node with given id",
    "Could not find node",
    "Could not find object with given id",
    "Cannot find context",
    "Cannot find object with id",
    "Node is detached",
];

fn classify(message: String) -> SettleError {
    if DETACHED_MARKERS.iter().any(|marker| message.contains(marker)) {
        SettleError::Detached { message }
    } else {
        SettleError::Driver { message }
    }
}

fn cdp_error(e: CdpError) -> SettleError {
    classify(e.to_string())
}

fn exception_message(details: &ExceptionDetails) -> String {
    details
        .exception
        .as_ref()
        .and_then(|exception| exception.description.clone())
        .unwrap_or_else(|| details.text.clone())
}

// =============================================================================
// REQUEST BUILDERS
// =============================================================================

/// Wrap `js` so a disconnected element throws instead of answering
fn guarded(js: &str) -> String {
    format!(
        "function() {{ \
         if (!this.isConnected) {{ throw new Error('{DETACHED_MESSAGE}'); }} \
         return ({js}).call(this); }}"
    )
}

fn call_params(
    object_id: &RemoteObjectId,
    js: &str,
    return_by_value: bool,
    await_promise: bool,
) -> SettleResult<CallFunctionOnParams> {
    CallFunctionOnParams::builder()
        .function_declaration(guarded(js))
        .object_id(object_id.clone())
        .return_by_value(return_by_value)
        .await_promise(await_promise)
        .build()
        .map_err(|message| SettleError::Driver { message })
}

/// `Runtime.callFunctionOn` for a [`Probe`], answered by value
fn probe_call(object_id: &RemoteObjectId, probe: &Probe) -> SettleResult<CallFunctionOnParams> {
    call_params(object_id, &probe.to_js(), true, false)
}

fn bounding_box_call(object_id: &RemoteObjectId) -> SettleResult<CallFunctionOnParams> {
    call_params(object_id, BOUNDING_BOX_JS, true, false)
}

/// The observer callback resolves a promise, so this one awaits it
fn intersection_ratio_call(object_id: &RemoteObjectId) -> SettleResult<CallFunctionOnParams> {
    call_params(object_id, INTERSECTION_RATIO_JS, true, true)
}

/// Relative element as a remote object (`null` when there is none)
fn relative_call(object_id: &RemoteObjectId, property: &str) -> SettleResult<CallFunctionOnParams> {
    call_params(
        object_id,
        &format!("function() {{ return this.{property}; }}"),
        false,
        false,
    )
}

/// Matches under the element as a remote array object
fn query_within_call(
    object_id: &RemoteObjectId,
    selector: &str,
) -> SettleResult<CallFunctionOnParams> {
    let quoted = Value::String(selector.to_string());
    call_params(
        object_id,
        &format!("function() {{ return Array.from(this.querySelectorAll({quoted})); }}"),
        false,
        false,
    )
}

fn array_items_params(array: RemoteObjectId) -> SettleResult<GetPropertiesParams> {
    GetPropertiesParams::builder()
        .object_id(array)
        .own_properties(true)
        .build()
        .map_err(|message| SettleError::Driver { message })
}

// =============================================================================
// DRIVER
// =============================================================================

/// Element handle backed by a CDP remote object
#[derive(Debug, Clone)]
pub struct CdpHandle(RemoteObjectId);

impl CdpHandle {
    /// The remote object id of the element
    #[must_use]
    pub const fn object_id(&self) -> &RemoteObjectId {
        &self.0
    }
}

/// Driver over a chromiumoxide page
#[derive(Debug, Clone, Default)]
pub struct CdpDriver {
    inner: Option<Arc<Mutex<CdpPage>>>,
}

impl CdpDriver {
    /// Attach to an open page
    #[must_use]
    pub fn new(page: CdpPage) -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(page))),
        }
    }

    /// Driver with no page yet; every query fails until [`CdpDriver::attach`]
    #[must_use]
    pub fn without_page() -> Self {
        Self::default()
    }

    /// Attach (or re-attach) to a page
    pub fn attach(&mut self, page: CdpPage) {
        self.inner = Some(Arc::new(Mutex::new(page)));
    }

    fn page(&self, action: &str, selector: &str) -> SettleResult<&Arc<Mutex<CdpPage>>> {
        self.inner.as_ref().ok_or_else(|| SettleError::NoPage {
            action: action.to_string(),
            selector: selector.to_string(),
        })
    }

    async fn call(&self, params: CallFunctionOnParams) -> SettleResult<RemoteObject> {
        let target = params
            .object_id
            .as_ref()
            .map(|id| id.inner().clone())
            .unwrap_or_default();
        let page = self.page("call a function on", &target)?.lock().await;
        let returns = page.execute(params).await.map_err(cdp_error)?.result;
        drop(page);
        if let Some(details) = &returns.exception_details {
            return Err(classify(exception_message(details)));
        }
        Ok(returns.result)
    }

    async fn value(&self, params: CallFunctionOnParams) -> SettleResult<Value> {
        Ok(self.call(params).await?.value.unwrap_or(Value::Null))
    }

    async fn object(&self, params: CallFunctionOnParams) -> SettleResult<Option<CdpHandle>> {
        Ok(self.call(params).await?.object_id.map(CdpHandle))
    }

    async fn release(&self, object_id: RemoteObjectId) {
        let Ok(page) = self.page("release", object_id.inner()) else {
            return;
        };
        let page = page.lock().await;
        if let Err(e) = page.execute(ReleaseObjectParams::new(object_id)).await {
            debug!(error = %e, "could not release remote array");
        }
    }

    async fn array_items(&self, array: RemoteObjectId) -> SettleResult<Vec<CdpHandle>> {
        let page = self.page("read matches of", array.inner())?.lock().await;
        let properties = page
            .execute(array_items_params(array.clone())?)
            .await
            .map_err(cdp_error)?
            .result
            .result;
        drop(page);
        self.release(array).await;

        let mut items: Vec<(usize, CdpHandle)> = properties
            .into_iter()
            .filter_map(|property| {
                let index = property.name.parse::<usize>().ok()?;
                let object_id = property.value?.object_id?;
                Some((index, CdpHandle(object_id)))
            })
            .collect();
        items.sort_by_key(|(index, _)| *index);
        Ok(items.into_iter().map(|(_, handle)| handle).collect())
    }
}

#[async_trait]
impl Driver for CdpDriver {
    type Handle = CdpHandle;

    async fn query_all(&self, selector: &str) -> SettleResult<Vec<CdpHandle>> {
        let page = self.page("query selector", selector)?.lock().await;
        let elements = page.find_elements(selector).await.map_err(cdp_error)?;
        Ok(elements
            .into_iter()
            .map(|element| CdpHandle(element.remote_object_id))
            .collect())
    }

    async fn query_all_within(
        &self,
        handle: &CdpHandle,
        selector: &str,
    ) -> SettleResult<Vec<CdpHandle>> {
        match self.object(query_within_call(&handle.0, selector)?).await? {
            Some(array) => self.array_items(array.0).await,
            None => Ok(Vec::new()),
        }
    }

    async fn evaluate(&self, handle: &CdpHandle, probe: &Probe) -> SettleResult<Value> {
        self.value(probe_call(&handle.0, probe)?).await
    }

    async fn parent(&self, handle: &CdpHandle) -> SettleResult<Option<CdpHandle>> {
        self.object(relative_call(&handle.0, "parentElement")?).await
    }

    async fn next_sibling(&self, handle: &CdpHandle) -> SettleResult<Option<CdpHandle>> {
        self.object(relative_call(&handle.0, "nextElementSibling")?).await
    }

    async fn previous_sibling(&self, handle: &CdpHandle) -> SettleResult<Option<CdpHandle>> {
        self.object(relative_call(&handle.0, "previousElementSibling")?).await
    }

    async fn bounding_box(&self, handle: &CdpHandle) -> SettleResult<ClientRect> {
        decode(self.value(bounding_box_call(&handle.0)?).await?)
    }

    async fn intersection_ratio(&self, handle: &CdpHandle) -> SettleResult<f64> {
        decode(self.value(intersection_ratio_call(&handle.0)?).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element_id() -> RemoteObjectId {
        RemoteObjectId::new("7135446290150497233.1.3")
    }

    fn wire(params: &CallFunctionOnParams) -> Value {
        serde_json::to_value(params).unwrap()
    }

    mod classify_tests {
        use super::*;

        #[test]
        fn test_protocol_errors_classified() {
            assert!(classify("No node with given id found".to_string()).is_detachment());
            assert!(classify("Cannot find context with specified id".to_string()).is_detachment());
            assert!(classify("Could not find object with given id".to_string()).is_detachment());
            assert!(!classify("Target closed".to_string()).is_detachment());
        }

        #[test]
        fn test_guard_exception_is_detachment() {
            let details: ExceptionDetails = serde_json::from_value(json!({
                "exceptionId": 1,
                "text": "Uncaught",
                "lineNumber": 0,
                "columnNumber": 0,
                "exception": {
                    "type": "object",
                    "subtype": "error",
                    "description": format!("Error: {DETACHED_MESSAGE}\n    at <anonymous>:1:60")
                }
            }))
            .unwrap();
            assert!(classify(exception_message(&details)).is_detachment());
        }

        #[test]
        fn test_exception_without_object_uses_text() {
            let details: ExceptionDetails = serde_json::from_value(json!({
                "exceptionId": 2,
                "text": "Uncaught SyntaxError",
                "lineNumber": 0,
                "columnNumber": 0
            }))
            .unwrap();
            let err = classify(exception_message(&details));
            assert!(!err.is_detachment());
            assert!(err.to_string().contains("Uncaught SyntaxError"));
        }
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_extraction_returns_by_value() {
            let params = wire(&probe_call(&element_id(), &Probe::ComputedStyle).unwrap());
            assert_eq!(params["objectId"], "7135446290150497233.1.3");
            assert_eq!(params["returnByValue"], true);
            assert_eq!(params["awaitPromise"], false);
            let js = params["functionDeclaration"].as_str().unwrap();
            assert!(js.contains("getComputedStyle"));
        }

        #[test]
        fn test_every_extraction_returns_by_value() {
            for probe in [
                Probe::InnerText,
                Probe::ClassList,
                Probe::SelectOptions,
                Probe::Attribute("role".to_string()),
            ] {
                let params = wire(&probe_call(&element_id(), &probe).unwrap());
                assert_eq!(params["returnByValue"], true, "{probe:?}");
            }
        }

        #[test]
        fn test_bounding_box_returns_by_value() {
            let params = wire(&bounding_box_call(&element_id()).unwrap());
            assert_eq!(params["returnByValue"], true);
            assert_eq!(params["awaitPromise"], false);
        }

        #[test]
        fn test_intersection_ratio_awaits_promise() {
            let params = wire(&intersection_ratio_call(&element_id()).unwrap());
            assert_eq!(params["returnByValue"], true);
            assert_eq!(params["awaitPromise"], true);
            let js = params["functionDeclaration"].as_str().unwrap();
            assert!(js.contains("IntersectionObserver"));
        }

        #[test]
        fn test_relative_returns_object_without_touching_page() {
            let params = wire(&relative_call(&element_id(), "nextElementSibling").unwrap());
            assert_eq!(params["returnByValue"], false);
            let js = params["functionDeclaration"].as_str().unwrap();
            assert!(js.contains("this.nextElementSibling"));
            assert!(!js.contains("setAttribute"));
        }

        #[test]
        fn test_scoped_query_quotes_selector() {
            let params = wire(&query_within_call(&element_id(), "input[name=\"q\"]").unwrap());
            assert_eq!(params["returnByValue"], false);
            let js = params["functionDeclaration"].as_str().unwrap();
            assert!(js.contains(r#"querySelectorAll("input[name=\"q\"]")"#), "{js}");
        }

        #[test]
        fn test_calls_are_guarded_against_detached_nodes() {
            let params = wire(&probe_call(&element_id(), &Probe::InnerText).unwrap());
            let js = params["functionDeclaration"].as_str().unwrap();
            assert!(js.starts_with("function()"));
            assert!(js.contains("this.isConnected"));
            assert!(js.contains(DETACHED_MESSAGE));
        }

        #[test]
        fn test_array_items_reads_own_properties() {
            let params = serde_json::to_value(array_items_params(element_id()).unwrap()).unwrap();
            assert_eq!(params["objectId"], "7135446290150497233.1.3");
            assert_eq!(params["ownProperties"], true);
        }
    }

    #[tokio::test]
    async fn test_without_page_is_configuration_error() {
        let driver = CdpDriver::without_page();
        let err = driver.query_all("#app").await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("'#app'"));

        let err = driver
            .evaluate(&CdpHandle(element_id()), &Probe::InnerText)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
