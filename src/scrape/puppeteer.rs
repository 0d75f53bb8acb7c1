use core::time::Duration;
use std::{ffi::OsStr, sync::Arc};

use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tokio::task::spawn_blocking;

use crate::util::Poll;

/// Long enough to survive the operator logging in by hand.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub fn puppeteer(headless: bool, proxy: Option<&str>) -> anyhow::Result<Browser> {
    Browser::new(LaunchOptions {
        args: vec![OsStr::new("--disable-blink-features=AutomationControlled")],
        headless,
        proxy_server: proxy,
        idle_browser_timeout: IDLE_TIMEOUT,
        ..LaunchOptions::default()
    })
}

pub fn attach(ws_url: &str) -> anyhow::Result<Browser> {
    Browser::connect_with_timeout(ws_url.to_owned(), IDLE_TIMEOUT)
}

#[allow(clippy::significant_drop_tightening)]
pub fn first_tab(browser: &Browser) -> anyhow::Result<Arc<Tab>> {
    let tab = browser.new_tab()?;

    {
        let tabs_guard = browser
            .get_tabs()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for remain in &*tabs_guard {
            if !Arc::ptr_eq(&tab, remain) {
                remain.close(true)?;
            }
        }
    }

    Ok(tab)
}

/// Runs a blocking tab operation off the async runtime.
pub async fn with_tab<T, F>(tab: &Arc<Tab>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let tab = Arc::clone(tab);

    spawn_blocking(move || f(&tab)).await?
}

pub async fn navigate_to(tab: &Arc<Tab>, url: String) -> anyhow::Result<()> {
    with_tab(tab, move |tab| tab.navigate_to(&url)?.wait_until_navigated().map(|_| ())).await
}

pub async fn evaluate(tab: &Arc<Tab>, expression: String) -> anyhow::Result<Option<Value>> {
    with_tab(tab, move |tab| Ok(tab.evaluate(&expression, false)?.value)).await
}

pub async fn current_url(tab: &Arc<Tab>) -> anyhow::Result<String> {
    with_tab(tab, |tab| Ok(tab.get_url())).await
}

pub async fn page_html(tab: &Arc<Tab>) -> anyhow::Result<String> {
    with_tab(tab, Tab::get_content).await
}

pub async fn wait_loaded(tab: &Arc<Tab>, poll: Poll) -> anyhow::Result<()> {
    poll.until(move || async move {
        let state = evaluate(tab, "document.readyState".to_owned()).await?;
        Ok((state.as_ref().and_then(Value::as_str) == Some("complete")).then_some(()))
    })
    .await
}

pub async fn count(tab: &Arc<Tab>, selector: &str) -> anyhow::Result<u64> {
    let expression = format!(
        "document.querySelectorAll({}).length",
        serde_json::to_string(selector)?,
    );
    Ok(evaluate(tab, expression).await?.as_ref().and_then(Value::as_u64).unwrap_or(0))
}

/// Number of `selector` matches once there is at least one, `None` if none appear in time.
pub async fn wait_for(tab: &Arc<Tab>, selector: &str, poll: Poll) -> anyhow::Result<Option<u64>> {
    poll.until_or_none(move || async move { Ok(Some(count(tab, selector).await?).filter(|&n| n > 0)) })
        .await
}

async fn scroll_height(tab: &Arc<Tab>) -> anyhow::Result<u64> {
    let height = evaluate(tab, "document.body.scrollHeight".to_owned()).await?;
    Ok(height.as_ref().and_then(Value::as_u64).unwrap_or(0))
}

/// Scrolls to the bottom and waits for the page to grow.
///
/// Returns `false` when nothing new was loaded before the poll ran out.
pub async fn scroll_once(tab: &Arc<Tab>, poll: Poll) -> anyhow::Result<bool> {
    let before = scroll_height(tab).await?;
    evaluate(tab, "window.scrollTo(0, document.body.scrollHeight)".to_owned()).await?;

    let grown = poll
        .until_or_none(move || async move { Ok((scroll_height(tab).await? > before).then_some(())) })
        .await?;
    Ok(grown.is_some())
}
