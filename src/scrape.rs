//! Browser session on the search results page.
//!
//! The session is not fully unattended: when the saved cookies do not log the
//! browser in, the operator is asked to log in by hand before scraping starts.

pub mod puppeteer;

use std::{path::Path, sync::Arc};

use headless_chrome::{Browser, Tab, protocol::cdp::Network::CookieParam};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tokio::task::spawn_blocking;

use crate::{
    config::{BrowserArgs, SearchArgs},
    util::{Poll, prompt_line, retry},
};

pub struct Session {
    // dropping the browser closes the connection
    _browser: Browser,
    tab: Arc<Tab>,
}

impl Session {
    /// Launches or attaches to a browser, retrying a fixed number of times.
    pub async fn establish(args: &BrowserArgs) -> anyhow::Result<Self> {
        let what = args.browser_ws.as_deref().map_or_else(
            || "launching browser".to_owned(),
            |ws| format!("connecting to browser at {ws}"),
        );

        retry(args.connect_attempts, args.connect_delay(), &what, || {
            let ws = args.browser_ws.clone();
            let proxy = args.proxy.clone();
            let headless = args.headless;
            async move {
                spawn_blocking(move || -> anyhow::Result<Self> {
                    let browser = match ws {
                        Some(ws) => puppeteer::attach(&ws)?,
                        None => puppeteer::puppeteer(headless, proxy.as_deref())?,
                    };
                    let tab = puppeteer::first_tab(&browser)?;
                    Ok(Self { _browser: browser, tab })
                })
                .await?
            }
        })
        .await
    }

    /// Human-in-the-loop login checkpoint.
    ///
    /// Saved cookies are tried first; if the login page does not redirect
    /// away, the operator logs in manually and confirms on the terminal.
    pub async fn login(&self, args: &BrowserArgs, poll: Poll) -> anyhow::Result<()> {
        if let Some(path) = &args.cookies {
            self.load_cookies(path).await?;
        }

        tracing::info!(target: "session", "navigating to login page {} ...", args.login_url);
        puppeteer::navigate_to(&self.tab, args.login_url.clone()).await?;
        puppeteer::wait_loaded(&self.tab, poll).await?;

        if self.logged_in().await? {
            tracing::info!(target: "session", "already logged in");
        } else {
            spawn_blocking(|| {
                prompt_line("Please log in to Twitter manually, then press Enter to continue...")
            })
            .await??;

            if !self.logged_in().await? {
                anyhow::bail!("login check failed, log in before pressing Enter");
            }
            tracing::info!(target: "session", "\x1b[36mlogin confirmed\x1b[0m");
        }

        if let Some(path) = &args.cookies {
            self.save_cookies(path).await?;
        }
        Ok(())
    }

    async fn logged_in(&self) -> anyhow::Result<bool> {
        let url = puppeteer::current_url(&self.tab).await?;
        Ok(left_login_flow(&url))
    }

    async fn load_cookies(&self, path: &Path) -> anyhow::Result<()> {
        let saved = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<Vec<Value>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: "session", "no cookie jar at {}", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let params = cookie_params(saved);
        let n = params.len();
        puppeteer::with_tab(&self.tab, move |tab| tab.set_cookies(params)).await?;
        tracing::info!(target: "session", "loaded {n} cookies from {}", path.display());
        Ok(())
    }

    async fn save_cookies(&self, path: &Path) -> anyhow::Result<()> {
        let cookies = puppeteer::with_tab(&self.tab, Tab::get_cookies).await?;
        std::fs::write(path, serde_json::to_vec_pretty(&cookies)?)?;
        tracing::info!(target: "session", "saved {} cookies to {}", cookies.len(), path.display());
        Ok(())
    }

    /// Opens the live results for `term` and scrolls to load more of them.
    pub async fn search(&self, term: &str, args: &SearchArgs) -> anyhow::Result<()> {
        let url = search_url(&args.search_url, term)?;
        let poll = Poll::new(args.page_timeout());

        tracing::info!(target: "session", "navigating to search page {url} ...");
        puppeteer::navigate_to(&self.tab, url.into()).await?;
        puppeteer::wait_loaded(&self.tab, poll).await?;

        let Some(n) = puppeteer::wait_for(&self.tab, &args.selector, poll).await? else {
            tracing::info!(target: "session", "no results for {term} after {:?}", poll.timeout);
            return Ok(());
        };
        tracing::info!(target: "session", "{n} elements on first load");

        for i in 1..=args.scrolls {
            if !puppeteer::scroll_once(&self.tab, poll).await? {
                tracing::info!(target: "session", "nothing new after scroll #{i}, stop scrolling");
                break;
            }
        }
        Ok(())
    }

    /// Text of every element matching `selector` on the current page.
    pub async fn extract(&self, selector: &Selector) -> anyhow::Result<Vec<anyhow::Result<String>>> {
        let html = puppeteer::page_html(&self.tab).await?;
        Ok(extract_texts(&html, selector))
    }
}

/// `<base>?q=%23<term>&f=live`
pub fn search_url(base: &str, term: &str) -> anyhow::Result<Url> {
    let term = term.trim().trim_start_matches('#');
    if term.is_empty() {
        anyhow::bail!("empty search term");
    }
    let hashtag = format!("#{term}");
    Ok(Url::parse_with_params(base, [("q", hashtag.as_str()), ("f", "live")])?)
}

/// Whether the browser has left every login page.
pub fn left_login_flow(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };
    let path = url.path();
    url.scheme().starts_with("http")
        && !path.starts_with("/login")
        && !path.starts_with("/i/flow/login")
        && !path.starts_with("/i/flow/signup")
}

pub fn parse_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("invalid selector {selector:?}: {e}"))
}

/// One entry per matching element; an element without text is an error.
pub fn extract_texts(html: &str, selector: &Selector) -> Vec<anyhow::Result<String>> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .enumerate()
        .map(|(idx, element)| {
            let mut text = String::new();
            render_text(element, &mut text);
            let text = text.trim();
            if text.is_empty() {
                Err(anyhow::anyhow!("element #{idx} <{}> has no text", element.value().name()))
            } else {
                Ok(text.to_owned())
            }
        })
        .collect()
}

const BLOCK: [&str; 17] = [
    "address", "article", "blockquote", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3", "header",
    "li", "ol", "p", "pre", "ul",
];

/// Element text as the browser renders it: `<br>` and block boundaries become
/// line breaks.
fn render_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if name == "br" {
                out.push('\n');
                continue;
            }
            let block = BLOCK.contains(&name);
            if block {
                line_break(out);
            }
            render_text(child, out);
            if block {
                line_break(out);
            }
        }
    }
}

fn line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Rebuilds `Network.setCookies` parameters from a saved cookie jar.
///
/// Session cookies (negative expiry) are restored without an expiry.
pub fn cookie_params(saved: Vec<Value>) -> Vec<CookieParam> {
    const KEPT: [&str; 6] = ["name", "value", "domain", "path", "secure", "httpOnly"];

    saved
        .into_iter()
        .filter_map(|cookie| {
            let Value::Object(mut cookie) = cookie else {
                return None;
            };
            let mut param = Map::new();
            for key in KEPT {
                if let Some(value) = cookie.remove(key) {
                    param.insert(key.to_owned(), value);
                }
            }
            if let Some(expires) = cookie.remove("expires").filter(|e| e.as_f64().is_some_and(|e| e > 0.0)) {
                param.insert("expires".to_owned(), expires);
            }
            match serde_json::from_value(Value::Object(param)) {
                Ok(param) => Some(param),
                Err(e) => {
                    tracing::warn!(target: "session", "skipping malformed cookie: {e}");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const PAGE: &str = r#"<html><body>
        <main>
            <article><div><div lang="en">Rust 1.0 is out <span>today</span>!</div></div></article>
            <article><div lang="ja">  こんにちは  </div></article>
            <article><div lang="en"><img alt="🦀"></div></article>
            <aside><div lang="en">Who to follow</div></aside>
        </main>
    </body></html>"#;

    #[test]
    fn extracts_text_of_each_match() {
        let selector = parse_selector("article div[lang]").unwrap();

        let texts = extract_texts(PAGE, &selector);

        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0].as_ref().unwrap(), "Rust 1.0 is out today!");
        assert_eq!(texts[1].as_ref().unwrap(), "こんにちは");
        assert!(texts[2].is_err());
    }

    #[test]
    fn no_match_extracts_nothing() {
        let selector = parse_selector("article div[data-testid=tweetText]").unwrap();
        assert!(extract_texts(PAGE, &selector).is_empty());
    }

    #[test]
    fn line_breaks_survive_extraction() {
        let selector = parse_selector("article div[lang]").unwrap();
        let page = r#"<article><div lang="en"><span>first line</span><br><span>second line</span></div></article>
            <article><div lang="en"><div>para one</div><div>para <b>two</b></div>tail</div></article>"#;

        let texts = extract_texts(page, &selector);

        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].as_ref().unwrap(), "first line\nsecond line");
        assert_eq!(texts[1].as_ref().unwrap(), "para one\npara two\ntail");
    }

    #[test]
    fn bad_selector_is_reported() {
        assert!(parse_selector("").is_err());
        assert!(parse_selector("div:no-such-class").is_err());
    }

    #[test]
    fn search_url_targets_live_hashtag() {
        let url = search_url("https://twitter.com/search", "whatsapp").unwrap();
        assert_eq!(url.as_str(), "https://twitter.com/search?q=%23whatsapp&f=live");

        let url = search_url("https://twitter.com/search", " #rust ").unwrap();
        assert_eq!(url.as_str(), "https://twitter.com/search?q=%23rust&f=live");

        assert!(search_url("https://twitter.com/search", " # ").is_err());
    }

    #[test]
    fn login_pages_are_not_logged_in() {
        assert!(!left_login_flow("https://twitter.com/login"));
        assert!(!left_login_flow("https://x.com/i/flow/login?redirect_after_login=%2F"));
        assert!(!left_login_flow("about:blank"));
        assert!(!left_login_flow(""));
        assert!(left_login_flow("https://x.com/home"));
        assert!(left_login_flow("https://twitter.com/search?q=%23rust"));
    }

    #[test]
    fn cookie_jar_round_trips_into_params() {
        let saved = vec![
            json!({
                "name": "auth_token",
                "value": "abc",
                "domain": ".twitter.com",
                "path": "/",
                "expires": 1_900_000_000.0,
                "size": 43,
                "httpOnly": true,
                "secure": true,
                "session": false,
            }),
            json!({
                "name": "lang",
                "value": "en",
                "domain": "twitter.com",
                "path": "/",
                "expires": -1,
                "httpOnly": false,
                "secure": false,
                "session": true,
            }),
            json!("garbage"),
        ];

        let params = cookie_params(saved);

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "auth_token");
        assert_eq!(params[0].value, "abc");
        assert_eq!(params[0].domain.as_deref(), Some(".twitter.com"));
        assert_eq!(params[0].http_only, Some(true));
        assert!(params[0].expires.is_some());
        assert_eq!(params[1].name, "lang");
        assert!(params[1].expires.is_none());
    }
}
