//! JSON-over-HTTP fetching.
//!
//! Both upstream APIs are read through the [`FetchJson`] trait, so the feed
//! loop and the category lookup can be driven by a scripted fake in tests.
//!
//! # Architecture
//!
//! - [`FetchJson`]: the capability, `fetch(url) -> JSON body or failure`
//! - [`HttpFetcher`]: the `reqwest` implementation used by the binary
//!
//! The HTTP status is not treated as a failure by itself. An upstream error
//! page that still parses as JSON is returned as a body, and callers decide
//! what its shape means. A body that is not JSON is a failure.

use crate::utils::truncate_for_log;
use reqwest::Client;
use serde_json::Value;
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Wikimedia rejects anonymous clients, so every request names this crate.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for fetching a URL and decoding its body as JSON.
pub trait FetchJson {
    /// Fetch `url` and decode the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not valid JSON.
    async fn fetch_json(&self, url: &str) -> Result<Value, Box<dyn Error>>;
}

/// [`FetchJson`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with the crate user agent and a request timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl FetchJson for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_json(&self, url: &str) -> Result<Value, Box<dyn Error>> {
        let t0 = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let dt = t0.elapsed();

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => {
                debug!(%status, elapsed_ms = dt.as_millis() as u128, bytes = body.len(), "Fetched JSON");
                Ok(value)
            }
            Err(e) => {
                warn!(
                    %status,
                    elapsed_ms = dt.as_millis() as u128,
                    error = %e,
                    body_preview = %truncate_for_log(&body, 200),
                    "Response body is not JSON"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted [`FetchJson`] fake shared by the pipeline tests.

    use super::FetchJson;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::error::Error;
    use std::sync::Mutex;

    type Reply = Result<Value, String>;

    /// Replies from a per-URL script. Once a script runs out, its last reply repeats.
    /// URLs without a script fail.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, (Vec<Reply>, usize)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Append a reply to the script for `url`.
        pub fn reply(self, url: impl Into<String>, reply: Reply) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(url.into())
                .or_default()
                .0
                .push(reply);
            self
        }

        pub fn ok(self, url: impl Into<String>, body: Value) -> Self {
            self.reply(url, Ok(body))
        }

        pub fn fail(self, url: impl Into<String>) -> Self {
            self.reply(url, Err("connection reset".to_string()))
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
        }
    }

    impl FetchJson for ScriptedFetcher {
        async fn fetch_json(&self, url: &str) -> Result<Value, Box<dyn Error>> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut scripts = self.scripts.lock().unwrap();
            let Some((replies, cursor)) = scripts.get_mut(url) else {
                return Err(format!("no route for {url}").into());
            };
            let reply = replies[(*cursor).min(replies.len() - 1)].clone();
            *cursor += 1;
            reply.map_err(Into::into)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::categories_for;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single raw HTTP/1.1 response on localhost and return its base URL.
    async fn serve_once(status: &'static str, content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_json_decodes_body() {
        let base = serve_once("200 OK", "application/json", r#"{"tfa":{"pageid":1}}"#).await;
        let fetcher = HttpFetcher::new().unwrap();

        let body = fetcher.fetch_json(&format!("{base}/2025/05/06")).await.unwrap();
        assert_eq!(body, json!({"tfa": {"pageid": 1}}));
    }

    #[tokio::test]
    async fn test_fetch_json_rejects_non_json_body() {
        let base = serve_once("200 OK", "text/html", "<html>maintenance</html>").await;
        let fetcher = HttpFetcher::new().unwrap();

        assert!(fetcher.fetch_json(&base).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_json_returns_error_status_with_json_body() {
        let base = serve_once(
            "404 Not Found",
            "application/problem+json",
            r#"{"type":"not_found","title":"Not found."}"#,
        )
        .await;
        let fetcher = HttpFetcher::new().unwrap();

        let body = fetcher.fetch_json(&base).await.unwrap();
        assert_eq!(body["type"], json!("not_found"));
    }

    #[tokio::test]
    async fn test_categories_for_non_json_response_is_empty() {
        let base = serve_once("200 OK", "text/html", "<!DOCTYPE html><html></html>").await;
        let fetcher = HttpFetcher::new().unwrap();

        let categories = categories_for(&fetcher, &format!("{base}/w/api.php"), "Rust").await;
        assert!(categories.is_empty());
    }

    #[tokio::test]
    async fn test_categories_for_over_http() {
        let base = serve_once(
            "200 OK",
            "application/json",
            r#"{"query":{"pages":{"25768":{"categories":[{"title":"Category:Systems programming languages"},{"title":"Category:Rust (programming language)"}]}}}}"#,
        )
        .await;
        let fetcher = HttpFetcher::new().unwrap();

        let categories = categories_for(&fetcher, &format!("{base}/w/api.php"), "Rust").await;
        assert_eq!(categories, ["Systems programming languages"]);
    }
}
