//! Browser page capability consumed by the engine.
//!
//! The engine never drives a browser itself. Callers hand in an
//! implementation of [`Page`] backed by whatever automation driver they use.
//! Futures are boxed so the trait stays object safe.

#[cfg(test)]
pub(crate) mod mock;

use crate::{config::ProbeConfig, config::UrlMatch, error::PageError, storage::StoredSession};
use serde_json::Value;
use std::{future::Future, pin::Pin, time::Duration};
use tokio::time::{sleep, Instant};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type PageResult<T> = Result<T, PageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// One logical browser tab and its context.
pub trait Page: Send + Sync {
    /// Current URL.
    fn url(&self) -> String;

    fn goto<'a>(&'a self, url: &'a str, timeout_ms: u64) -> BoxFuture<'a, PageResult<()>>;

    fn wait_for_url<'a>(
        &'a self,
        pattern: &'a UrlMatch,
        timeout_ms: u64,
    ) -> BoxFuture<'a, PageResult<()>>;

    /// Wait until `selector` is visible.
    fn wait_for_selector<'a>(
        &'a self,
        selector: &'a str,
        timeout_ms: u64,
    ) -> BoxFuture<'a, PageResult<()>>;

    fn wait_for_load_state(&self, state: LoadState, timeout_ms: u64)
        -> BoxFuture<'_, PageResult<()>>;

    fn fill<'a>(&'a self, selector: &'a str, value: &'a str) -> BoxFuture<'a, PageResult<()>>;

    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<()>>;

    /// Immediate visibility check, no waiting.
    fn is_visible<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<bool>>;

    fn input_value<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<String>>;

    fn text_content<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<Option<String>>>;

    fn evaluate<'a>(&'a self, script: &'a str) -> BoxFuture<'a, PageResult<Value>>;

    fn reload(&self, timeout_ms: u64) -> BoxFuture<'_, PageResult<()>>;

    /// Cookies and origin storage of the page's browser context.
    fn storage_state(&self) -> BoxFuture<'_, PageResult<StoredSession>>;

    fn clear_cookies(&self) -> BoxFuture<'_, PageResult<()>>;
}

/// Poll `selector` until it is visible or the probe timeout elapses.
/// Errors from the page count as "not visible".
pub async fn wait_visible(page: &dyn Page, selector: &str, probe: ProbeConfig) -> bool {
    let deadline = Instant::now() + Duration::from_millis(probe.timeout_ms);
    let interval = Duration::from_millis(probe.poll_interval_ms.max(1));

    loop {
        if matches!(page.is_visible(selector).await, Ok(true)) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// First selector of `selectors` that is visible right now.
pub async fn first_visible<'s>(page: &dyn Page, selectors: &[&'s str]) -> Option<&'s str> {
    for selector in selectors {
        if matches!(page.is_visible(selector).await, Ok(true)) {
            return Some(selector);
        }
    }
    None
}

pub async fn settle(ms: u64) {
    if ms > 0 {
        sleep(Duration::from_millis(ms)).await;
    }
}
