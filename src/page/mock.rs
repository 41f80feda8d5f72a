//! Scripted in-memory page for tests.

use super::{BoxFuture, LoadState, Page, PageResult};
use crate::{config::UrlMatch, error::PageError, storage::StoredSession};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::ready,
    sync::Mutex,
    time::Duration,
};
use tokio::time::{sleep, Instant};

const POLL: Duration = Duration::from_millis(10);

/// State change applied after a click, navigation or reload.
#[derive(Clone, Debug, Default)]
pub struct Reaction {
    pub url: Option<String>,
    pub show: Vec<String>,
    pub hide: Vec<String>,
    pub texts: Vec<(String, String)>,
}

impl Reaction {
    pub fn navigate(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn show(mut self, selector: &str) -> Self {
        self.show.push(selector.to_string());
        self
    }

    pub fn hide(mut self, selector: &str) -> Self {
        self.hide.push(selector.to_string());
        self
    }

    pub fn text(mut self, selector: &str, text: &str) -> Self {
        self.show.push(selector.to_string());
        self.texts.push((selector.to_string(), text.to_string()));
        self
    }
}

#[derive(Default)]
struct State {
    url: String,
    visible: HashSet<String>,
    values: HashMap<String, String>,
    texts: HashMap<String, String>,
    on_click: HashMap<String, VecDeque<Reaction>>,
    on_goto: HashMap<String, Reaction>,
    on_reload: Option<Reaction>,
    goto_failures: VecDeque<PageError>,
    evaluate_results: VecDeque<Value>,
    scripts: Vec<String>,
    actions: Vec<String>,
    session: StoredSession,
    cookies_cleared: bool,
    slow_waits: bool,
}

impl State {
    fn apply(&mut self, reaction: &Reaction) {
        if let Some(url) = &reaction.url {
            self.url.clone_from(url);
        }
        for selector in &reaction.hide {
            self.visible.remove(selector);
        }
        for selector in &reaction.show {
            self.visible.insert(selector.clone());
        }
        for (selector, text) in &reaction.texts {
            self.texts.insert(selector.clone(), text.clone());
        }
    }
}

#[derive(Default)]
pub struct MockPage {
    state: Mutex<State>,
}

impl MockPage {
    pub fn new(url: &str) -> Self {
        let page = Self::default();
        page.lock().url = url.to_string();
        page
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_visible(self, selector: &str) -> Self {
        self.lock().visible.insert(selector.to_string());
        self
    }

    pub fn with_value(self, selector: &str, value: &str) -> Self {
        self.lock()
            .values
            .insert(selector.to_string(), value.to_string());
        self
    }

    pub fn with_text(self, selector: &str, text: &str) -> Self {
        {
            let mut state = self.lock();
            state.visible.insert(selector.to_string());
            state.texts.insert(selector.to_string(), text.to_string());
        }
        self
    }

    /// Reactions queue per selector; the last one repeats.
    pub fn on_click(self, selector: &str, reaction: Reaction) -> Self {
        self.lock()
            .on_click
            .entry(selector.to_string())
            .or_default()
            .push_back(reaction);
        self
    }

    pub fn on_goto(self, url: &str, reaction: Reaction) -> Self {
        self.lock().on_goto.insert(url.to_string(), reaction);
        self
    }

    pub fn on_reload(self, reaction: Reaction) -> Self {
        self.lock().on_reload = Some(reaction);
        self
    }

    pub fn fail_goto(self, error: PageError) -> Self {
        self.lock().goto_failures.push_back(error);
        self
    }

    pub fn with_evaluate_result(self, value: Value) -> Self {
        self.lock().evaluate_results.push_back(value);
        self
    }

    /// Waits poll the page state until their timeout instead of failing at once.
    pub fn with_slow_waits(self) -> Self {
        self.lock().slow_waits = true;
        self
    }

    async fn poll_until(&self, timeout_ms: u64, done: impl Fn(&State) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if done(&self.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL).await;
        }
    }

    pub fn with_session(self, session: StoredSession) -> Self {
        self.lock().session = session;
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn value(&self, selector: &str) -> Option<String> {
        self.lock().values.get(selector).cloned()
    }

    pub fn cookies_cleared(&self) -> bool {
        self.lock().cookies_cleared
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .actions
            .iter()
            .filter(|a| a.starts_with(prefix))
            .count()
    }
}

impl Page for MockPage {
    fn url(&self) -> String {
        self.lock().url.clone()
    }

    fn goto<'a>(&'a self, url: &'a str, _timeout_ms: u64) -> BoxFuture<'a, PageResult<()>> {
        let mut state = self.lock();
        state.actions.push(format!("goto:{url}"));
        if let Some(err) = state.goto_failures.pop_front() {
            return Box::pin(ready(Err(err)));
        }
        state.url = url.to_string();
        if let Some(reaction) = state.on_goto.get(url).cloned() {
            state.apply(&reaction);
        }
        Box::pin(ready(Ok(())))
    }

    fn wait_for_url<'a>(
        &'a self,
        pattern: &'a UrlMatch,
        timeout_ms: u64,
    ) -> BoxFuture<'a, PageResult<()>> {
        if self.lock().slow_waits {
            return Box::pin(async move {
                if self.poll_until(timeout_ms, |state| pattern.matches(&state.url)).await {
                    Ok(())
                } else {
                    Err(PageError::timeout(pattern.to_string(), timeout_ms))
                }
            });
        }
        let result = if pattern.matches(&self.lock().url) {
            Ok(())
        } else {
            Err(PageError::timeout(pattern.to_string(), timeout_ms))
        };
        Box::pin(ready(result))
    }

    fn wait_for_selector<'a>(
        &'a self,
        selector: &'a str,
        timeout_ms: u64,
    ) -> BoxFuture<'a, PageResult<()>> {
        if self.lock().slow_waits {
            return Box::pin(async move {
                if self.poll_until(timeout_ms, |state| state.visible.contains(selector)).await {
                    Ok(())
                } else {
                    Err(PageError::timeout(format!("selector '{selector}'"), timeout_ms))
                }
            });
        }
        let result = if self.lock().visible.contains(selector) {
            Ok(())
        } else {
            Err(PageError::timeout(format!("selector '{selector}'"), timeout_ms))
        };
        Box::pin(ready(result))
    }

    fn wait_for_load_state(
        &self,
        state: LoadState,
        _timeout_ms: u64,
    ) -> BoxFuture<'_, PageResult<()>> {
        self.lock().actions.push(format!("load:{state:?}"));
        Box::pin(ready(Ok(())))
    }

    fn fill<'a>(&'a self, selector: &'a str, value: &'a str) -> BoxFuture<'a, PageResult<()>> {
        let mut state = self.lock();
        let result = if state.visible.contains(selector) {
            state.actions.push(format!("fill:{selector}"));
            state.values.insert(selector.to_string(), value.to_string());
            Ok(())
        } else {
            Err(PageError::Selector(selector.to_string()))
        };
        Box::pin(ready(result))
    }

    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<()>> {
        let mut state = self.lock();
        if !state.visible.contains(selector) {
            return Box::pin(ready(Err(PageError::Selector(selector.to_string()))));
        }
        state.actions.push(format!("click:{selector}"));
        let reaction = state.on_click.get_mut(selector).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        if let Some(reaction) = reaction {
            state.apply(&reaction);
        }
        Box::pin(ready(Ok(())))
    }

    fn is_visible<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<bool>> {
        Box::pin(ready(Ok(self.lock().visible.contains(selector))))
    }

    fn input_value<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<String>> {
        let value = self.lock().values.get(selector).cloned().unwrap_or_default();
        Box::pin(ready(Ok(value)))
    }

    fn text_content<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, PageResult<Option<String>>> {
        Box::pin(ready(Ok(self.lock().texts.get(selector).cloned())))
    }

    fn evaluate<'a>(&'a self, script: &'a str) -> BoxFuture<'a, PageResult<Value>> {
        let mut state = self.lock();
        state.scripts.push(script.to_string());
        let value = state.evaluate_results.pop_front().unwrap_or(Value::Null);
        Box::pin(ready(Ok(value)))
    }

    fn reload(&self, _timeout_ms: u64) -> BoxFuture<'_, PageResult<()>> {
        let mut state = self.lock();
        state.actions.push("reload".to_string());
        if let Some(reaction) = state.on_reload.clone() {
            state.apply(&reaction);
        }
        Box::pin(ready(Ok(())))
    }

    fn storage_state(&self) -> BoxFuture<'_, PageResult<StoredSession>> {
        Box::pin(ready(Ok(self.lock().session.clone())))
    }

    fn clear_cookies(&self) -> BoxFuture<'_, PageResult<()>> {
        let mut state = self.lock();
        state.cookies_cleared = true;
        state.session.cookies.clear();
        Box::pin(ready(Ok(())))
    }
}
