//! Headless-browser session capture
//!
//! Navigates a real product page in Chrome and intercepts the page's own
//! detail-API request to lift its headers, challenge token and cookie jar.
//! One browser process and one tab live for the builder's lifetime.

use super::{SessionBuilder, SessionContext};
use crate::config::{MarketplaceConfig, SessionConfig};
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, Request,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct BrowserState {
    browser: Browser,
    page: Page,
    driver: JoinHandle<()>,
}

/// Header set + challenge token lifted from one intercepted request
struct CapturedRequest {
    headers: Vec<(String, String)>,
    token: String,
}

/// Chrome-backed [`SessionBuilder`]
pub struct ChromeSessionBuilder {
    session: SessionConfig,
    page_url: String,
    api_url_marker: String,
    state: Mutex<Option<BrowserState>>,
}

impl ChromeSessionBuilder {
    pub fn new(session: SessionConfig, marketplace: &MarketplaceConfig) -> Self {
        let page_url = marketplace.page_url(session.probe_item_id);
        Self {
            session,
            page_url,
            api_url_marker: marketplace.api_url_marker.clone(),
            state: Mutex::new(None),
        }
    }

    fn browser_error(e: impl std::fmt::Display) -> WatchError {
        WatchError::Browser(e.to_string())
    }

    /// Launch the browser and open the long-lived tab on first use
    async fn ensure_browser(&self, state: &mut Option<BrowserState>) -> Result<()> {
        if state.is_some() {
            return Ok(());
        }

        let config = BrowserConfig::builder()
            .args(vec!["--no-sandbox", "--disable-dev-shm-usage"])
            .build()
            .map_err(WatchError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(Self::browser_error)?;

        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(Self::browser_error)?;
        // request events only flow once the Network domain is enabled
        page.execute(EnableParams::default())
            .await
            .map_err(Self::browser_error)?;

        info!("Headless browser launched for session capture");
        *state = Some(BrowserState {
            browser,
            page,
            driver,
        });
        Ok(())
    }

    /// Lift headers and the challenge token from a request, dropping
    /// `:`-prefixed transport pseudo-headers. A request qualifies only when
    /// it carries the challenge header.
    fn capture_request(request: &Request, challenge_header: &str) -> Option<CapturedRequest> {
        let value = serde_json::to_value(&request.headers).ok()?;
        let map = value.as_object()?;

        let mut headers = Vec::new();
        let mut token = None;
        for (name, value) in map {
            if name.starts_with(':') {
                continue;
            }
            let Some(value) = value.as_str() else {
                continue;
            };
            if name.eq_ignore_ascii_case(challenge_header) {
                token = Some(value.to_string());
            }
            headers.push((name.to_lowercase(), value.to_string()));
        }

        token.map(|token| CapturedRequest { headers, token })
    }
}

#[async_trait]
impl SessionBuilder for ChromeSessionBuilder {
    async fn build(&self) -> Result<SessionContext> {
        let mut guard = self.state.lock().await;
        self.ensure_browser(&mut guard).await?;
        let state = guard.as_mut().expect("browser state present after ensure");

        let mut events = state
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(Self::browser_error)?;

        let marker = self.api_url_marker.clone();
        let challenge_header = self.session.challenge_header.clone();
        let capture = async move {
            while let Some(event) = events.next().await {
                if !event.request.url.contains(&marker) {
                    continue;
                }
                if let Some(captured) = Self::capture_request(&event.request, &challenge_header) {
                    return Some(captured);
                }
            }
            None
        };

        debug!("Navigating to {} for session capture", self.page_url);
        let nav_timeout = Duration::from_secs(self.session.nav_timeout_secs);
        let intercept_timeout = Duration::from_secs(self.session.intercept_timeout_secs);

        let capture = tokio::time::timeout(intercept_timeout, capture);
        let nav = tokio::time::timeout(nav_timeout, state.page.goto(self.page_url.as_str()));
        tokio::pin!(capture);
        tokio::pin!(nav);

        let mut nav_pending = true;
        let captured = loop {
            tokio::select! {
                result = &mut capture => break result.ok().flatten(),
                result = &mut nav, if nav_pending => {
                    nav_pending = false;
                    match result {
                        Ok(Ok(_)) => debug!("Product page loaded"),
                        Ok(Err(e)) => warn!("Navigation error (ignored): {}", e),
                        Err(_) => warn!(
                            "Navigation timed out after {}s",
                            self.session.nav_timeout_secs
                        ),
                    }
                }
            }
        };

        let Some(captured) = captured else {
            return Err(WatchError::SessionUnavailable(format!(
                "no qualifying request intercepted within {}s",
                self.session.intercept_timeout_secs
            )));
        };

        let cookies = state
            .page
            .get_cookies()
            .await
            .map_err(Self::browser_error)?
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect();

        Ok(SessionContext::new(
            captured.headers,
            captured.token,
            cookies,
        ))
    }

    async fn shutdown(&self) {
        let Some(state) = self.state.lock().await.take() else {
            return;
        };
        let BrowserState {
            mut browser,
            page,
            driver,
        } = state;

        if let Err(e) = page.close().await {
            warn!("Tab close failed: {}", e);
        }
        if let Err(e) = browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Browser wait failed: {}", e);
        }
        driver.abort();
        info!("Headless browser shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_headers(headers: serde_json::Value) -> Request {
        serde_json::from_value(serde_json::json!({
            "url": "https://u-card.example/cards/v4/detail?nm=1",
            "method": "GET",
            "headers": headers,
            "initialPriority": "High",
            "referrerPolicy": "origin",
        }))
        .expect("valid CDP request")
    }

    #[test]
    fn test_capture_requires_challenge_header() {
        let request = request_with_headers(serde_json::json!({
            "user-agent": "Mozilla/5.0",
            "accept": "*/*",
        }));
        assert!(ChromeSessionBuilder::capture_request(&request, "x-pow").is_none());
    }

    #[test]
    fn test_capture_strips_pseudo_headers() {
        let request = request_with_headers(serde_json::json!({
            ":authority": "u-card.example",
            ":method": "GET",
            "User-Agent": "Mozilla/5.0",
            "x-pow": "proof-of-work-token",
        }));

        let captured = ChromeSessionBuilder::capture_request(&request, "x-pow").unwrap();
        assert_eq!(captured.token, "proof-of-work-token");
        assert!(captured.headers.iter().all(|(name, _)| !name.starts_with(':')));
        assert!(captured
            .headers
            .iter()
            .any(|(name, value)| name == "user-agent" && value == "Mozilla/5.0"));
    }
}
