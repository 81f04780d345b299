use std::collections::HashMap;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::error::{ExtractError, PageError};

/// The page collaborator: one current document, replaced on navigation.
///
/// Structural queries borrow from `document()`, so no node handle survives a
/// call to `navigate`.
pub trait PageSource {
    fn navigate(&mut self, url: &str) -> Result<(), PageError>;

    fn current_url(&self) -> Option<&Url>;

    fn document(&self) -> Result<&Html, PageError>;

    /// Give the source a chance to load more content. Returns whether the
    /// document changed.
    fn refresh(&mut self) -> Result<bool, PageError> {
        Ok(false)
    }
}

/// Bounded wait used while page content becomes available.
#[derive(Debug, Clone, Copy)]
pub struct Waits {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for Waits {
    fn default() -> Self {
        Waits {
            timeout: Duration::from_secs(10),
            poll: Duration::from_millis(250),
        }
    }
}

impl Waits {
    /// Check once, never sleep.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Waits {
            timeout: Duration::ZERO,
            poll: Duration::ZERO,
        }
    }
}

/// Poll until `selector` matches something in the current document.
pub fn wait_for<S: PageSource + ?Sized>(
    source: &mut S,
    selector: &Selector,
    what: &'static str,
    waits: &Waits,
) -> Result<(), ExtractError> {
    let start = Instant::now();
    loop {
        if source.document()?.select(selector).next().is_some() {
            return Ok(());
        }
        let waited = start.elapsed();
        if waited >= waits.timeout {
            return Err(ExtractError::Timeout { what, waited });
        }
        thread::sleep(waits.poll.min(waits.timeout - waited));
        source.refresh()?;
    }
}

pub fn parse_url(raw: &str) -> Result<Url, PageError> {
    Url::parse(raw).map_err(|source| PageError::Url {
        url: raw.to_string(),
        source,
    })
}

/// Resolve a link target against the page it was found on, keeping it only
/// when it stays on the same host.
pub fn same_site_target(base: &Url, href: &str) -> Option<Url> {
    let target = base.join(href.trim()).ok()?;
    (target.host_str().is_some() && target.host_str() == base.host_str()).then_some(target)
}

// ── Snapshots ──

/// Saved pages keyed by URL. Used for offline replay and tests.
#[derive(Default)]
pub struct SnapshotSource {
    pages: HashMap<String, String>,
    current: Option<(Url, Html)>,
    visits: Vec<String>,
}

impl SnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &str, html: impl Into<String>) {
        self.pages.insert(normalize_key(url), html.into());
    }

    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.insert(url, html);
        self
    }

    /// Load a directory holding `index.json` (`{"<url>": "<file>"}`) and the
    /// HTML files it names.
    pub fn from_dir(dir: &Path) -> Result<Self, PageError> {
        let manifest = std::fs::read_to_string(dir.join("index.json"))?;
        let index: HashMap<String, String> = serde_json::from_str(&manifest)?;
        let mut source = Self::new();
        for (url, file) in &index {
            source.insert(url, std::fs::read_to_string(dir.join(file))?);
        }
        info!("Loaded {} page snapshots from {}", index.len(), dir.display());
        Ok(source)
    }

    /// URLs navigated to, in order.
    #[cfg(test)]
    pub fn visits(&self) -> &[String] {
        &self.visits
    }
}

fn normalize_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

impl PageSource for SnapshotSource {
    fn navigate(&mut self, url: &str) -> Result<(), PageError> {
        let parsed = parse_url(url)?;
        let html = self
            .pages
            .get(&normalize_key(parsed.as_str()))
            .ok_or_else(|| PageError::UnknownUrl(url.to_string()))?;
        debug!(url, visit = self.visits.len() + 1, "loading snapshot");
        self.current = Some((parsed, Html::parse_document(html)));
        self.visits.push(url.to_string());
        Ok(())
    }

    fn current_url(&self) -> Option<&Url> {
        self.current.as_ref().map(|(url, _)| url)
    }

    fn document(&self) -> Result<&Html, PageError> {
        self.current.as_ref().map(|(_, doc)| doc).ok_or(PageError::NotLoaded)
    }
}

// ── Live HTTP ──

/// Fetches pages over HTTP with an optional session cookie.
pub struct HttpSource {
    client: Client,
    current: Option<(Url, Html)>,
}

impl HttpSource {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        session_cookie: Option<&str>,
    ) -> Result<Self, PageError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        if let Some(cookie) = session_cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie)?);
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            current: None,
        })
    }
}

impl PageSource for HttpSource {
    fn navigate(&mut self, url: &str) -> Result<(), PageError> {
        let start = Instant::now();
        let response = self.client.get(parse_url(url)?).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(PageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let final_url = response.url().clone();
        let body = response.text()?;
        debug!(
            url,
            final_url = %final_url,
            latency_ms = start.elapsed().as_millis() as u64,
            "fetched page"
        );
        self.current = Some((final_url, Html::parse_document(&body)));
        Ok(())
    }

    fn current_url(&self) -> Option<&Url> {
        self.current.as_ref().map(|(url, _)| url)
    }

    fn document(&self) -> Result<&Html, PageError> {
        self.current.as_ref().map(|(_, doc)| doc).ok_or(PageError::NotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_navigation_ignores_trailing_slash() {
        let mut source =
            SnapshotSource::new().with_page("https://www.linkedin.com/in/jane/", "<h1>Jane</h1>");
        source.navigate("https://www.linkedin.com/in/jane").unwrap();
        assert_eq!(
            source.current_url().map(Url::as_str),
            Some("https://www.linkedin.com/in/jane")
        );
        assert_eq!(source.visits().len(), 1);
    }

    #[test]
    fn unknown_snapshot_is_an_error() {
        let mut source = SnapshotSource::new();
        assert!(matches!(
            source.navigate("https://www.linkedin.com/in/nobody/"),
            Err(PageError::UnknownUrl(_))
        ));
        assert!(matches!(source.document(), Err(PageError::NotLoaded)));
    }

    #[test]
    fn wait_for_times_out_on_missing_content() {
        let mut source = SnapshotSource::new().with_page("https://example.com/a", "<p>hi</p>");
        source.navigate("https://example.com/a").unwrap();
        let present = Selector::parse("p").unwrap();
        let missing = Selector::parse("li").unwrap();
        let waits = Waits::immediate();
        assert!(wait_for(&mut source, &present, "paragraph", &waits).is_ok());
        assert!(matches!(
            wait_for(&mut source, &missing, "list item", &waits),
            Err(ExtractError::Timeout { what: "list item", .. })
        ));
    }

    #[test]
    fn same_site_targets() {
        let base = Url::parse("https://www.linkedin.com/in/jane/").unwrap();
        let rel = same_site_target(&base, "/in/jane/details/experience/").unwrap();
        assert_eq!(rel.as_str(), "https://www.linkedin.com/in/jane/details/experience/");
        assert!(same_site_target(&base, "https://evil.example.com/x").is_none());
    }

    #[test]
    fn snapshot_dir_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jane.html"), "<h1>Jane</h1>").unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"https://www.linkedin.com/in/jane/": "jane.html"}"#,
        )
        .unwrap();
        let mut source = SnapshotSource::from_dir(dir.path()).unwrap();
        source.navigate("https://www.linkedin.com/in/jane/").unwrap();
        let h1 = Selector::parse("h1").unwrap();
        assert!(source.document().unwrap().select(&h1).next().is_some());
    }
}
