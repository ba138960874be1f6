use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info};

use crate::catalog::PageFetcher;
use crate::config::HmvConfig;
use crate::credentials::Credentials;
use crate::listing::ListingParser;
use crate::model::PageResult;

const LOGIN_PATH: &str = "/login/auth.php";
const MACHINES_PATH: &str = "/machines/";
const LOGGED_IN_MARKER: &str = "Logout";

#[derive(Debug, Clone)]
pub struct HmvClientConfig {
    pub base_url: String,
    pub download_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl HmvClientConfig {
    pub fn from_config(config: &HmvConfig) -> Self {
        Self {
            base_url: config.base_url(),
            download_url: config.download_url(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            connect_timeout_ms: config.connect_timeout_ms(),
        }
    }
}

/// Cookie-backed HackMyVM session. Shared by reference between concurrent
/// page fetches, so the request counter is atomic.
pub struct HmvClient {
    client: Client,
    config: HmvClientConfig,
    parser: ListingParser,
    request_count: AtomicUsize,
}

impl HmvClient {
    pub fn new(config: HmvClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build HackMyVM HTTP client")?;

        Ok(Self {
            client,
            config,
            parser: ListingParser::new()?,
            request_count: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &HmvClientConfig {
        &self.config
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn site_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Authenticate the session. The site answers with HTTP 200 either way, so
    /// success is judged by the logged-in page content.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.note_request();
        let form = [
            ("admin", credentials.username.as_str()),
            ("password_usuario", credentials.password.as_str()),
        ];
        let response = match self
            .client
            .post(self.site_url(LOGIN_PATH))
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                bail!("authentication timed out; the server is being slow")
            }
            Err(error) => return Err(error).context("connection error during authentication"),
        };
        let body = response
            .text()
            .await
            .context("failed to read login response")?;
        if !login_succeeded(&body) {
            bail!("authentication failed; check your credentials");
        }
        info!(username = %credentials.username, "logged in");
        Ok(())
    }

    pub async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<(StatusCode, String)> {
        self.note_request();
        let response = self
            .client
            .get(self.site_url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to request {path}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body of {path}"))?;
        Ok((status, body))
    }

    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<String> {
        self.note_request();
        let response = self
            .client
            .post(self.site_url(path))
            .form(form)
            .send()
            .await
            .with_context(|| format!("failed to post to {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("request to {path} failed with HTTP {status}");
        }
        response
            .text()
            .await
            .with_context(|| format!("failed to read response body of {path}"))
    }

    /// GET an absolute URL, following redirects. The response is returned
    /// unread so callers can inspect the final URL and stream the body.
    pub async fn get_absolute(&self, url: &str) -> Result<Response> {
        self.note_request();
        self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to request {url}"))
    }

    fn note_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl PageFetcher for HmvClient {
    async fn fetch_page(&self, page: u32, selector: Option<&str>) -> Result<PageResult> {
        let mut query = vec![("p", page.to_string())];
        if let Some(selector) = selector {
            query.push(("l", selector.to_string()));
        }
        let (status, body) = self.get_text(MACHINES_PATH, &query).await?;
        if !status.is_success() {
            bail!("machine listing page {page} failed with HTTP {status}");
        }
        let result = self.parser.parse(&body, page);
        debug!(
            page,
            selector = selector.unwrap_or("<none>"),
            records = result.records.len(),
            "fetched listing page"
        );
        Ok(result)
    }
}

fn login_succeeded(body: &str) -> bool {
    body.contains(LOGGED_IN_MARKER)
}
