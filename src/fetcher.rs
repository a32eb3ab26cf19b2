//! Single-page fetching against the search API, with outcome
//! classification and a bounded fixed-pause retry for transient failures.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::delay_manager;

/// Extra attempts after the first failed one.
pub const MAX_RETRIES: u32 = 2;
/// Fixed pause between attempts.
pub const RETRY_PAUSE: Duration = Duration::from_secs(2);

const USER_AGENT: &str = concat!("registry-scraper/", env!("CARGO_PKG_VERSION"));

/// Raw transport outcome of one HTTP request: whatever status and body
/// the server produced, before any interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Network(String),
}

/// One blocking page request against the search API. Implementations own
/// the request timeout; callers never wait longer than that per attempt.
pub trait SearchApi {
    fn get(&self, query: &str, page: u32, credential: &str) -> Result<RawResponse, TransportError>;
}

pub struct HttpSearchApi {
    client: reqwest::blocking::Client,
    base_url: Url,
}

impl HttpSearchApi {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(HttpSearchApi { client, base_url })
    }
}

impl SearchApi for HttpSearchApi {
    fn get(&self, query: &str, page: u32, credential: &str) -> Result<RawResponse, TransportError> {
        // The site only serves the API to clients that came through its
        // results page, so the referer is derived from the endpoint origin.
        let mut referer = self.base_url.clone();
        referer.set_path("/search/results");
        referer.set_query(None);
        referer.query_pairs_mut().append_pair("q", query);

        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[("q", query), ("page", page.to_string().as_str())])
            .header("x-search-session", credential)
            .header(REFERER, referer.as_str())
            .send()
            .map_err(classify_transport)?;

        let status = response.status().as_u16();
        let body = response.text().map_err(classify_transport)?;
        Ok(RawResponse { status, body })
    }
}

fn classify_transport(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

/// One page as the API returns it. Absent fields take the documented
/// defaults so sparse responses still parse.
#[derive(Debug, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default = "default_total_pages", rename = "totalPages")]
    pub total_pages: u32,
    #[serde(default, rename = "total")]
    pub total_results: u64,
}

fn default_total_pages() -> u32 {
    1
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout { attempts: u32 },
    #[error("connection error: {detail}")]
    Connection { attempts: u32, detail: String },
    #[error("session expired: {detail}")]
    AuthExpired { detail: String },
    #[error("malformed response: {detail}")]
    Malformed { attempts: u32, detail: String },
    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },
}

impl FetchError {
    /// Timeouts, connection drops and unparseable bodies are worth another
    /// attempt. A rejected credential or an explicit HTTP error is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::Connection { .. } | FetchError::Malformed { .. }
        )
    }

    /// How many attempts were spent before this error was returned.
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::Timeout { attempts }
            | FetchError::Connection { attempts, .. }
            | FetchError::Malformed { attempts, .. } => *attempts,
            FetchError::AuthExpired { .. } | FetchError::Http { .. } => 1,
        }
    }
}

pub struct Fetcher<'a> {
    api: &'a dyn SearchApi,
    max_retries: u32,
    retry_pause: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(api: &'a dyn SearchApi) -> Self {
        Fetcher {
            api,
            max_retries: MAX_RETRIES,
            retry_pause: RETRY_PAUSE,
        }
    }

    /// Same as `new` but with an explicit retry policy.
    pub fn with_policy(api: &'a dyn SearchApi, max_retries: u32, retry_pause: Duration) -> Self {
        Fetcher {
            api,
            max_retries,
            retry_pause,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Fetch one page. Retryable failures are attempted up to
    /// `max_retries` more times with a fixed pause in between; `on_retry`
    /// fires once per abandoned attempt, before the pause. Everything else
    /// surfaces immediately. The returned error carries the attempt count.
    pub fn fetch_page(
        &self,
        query: &str,
        page: u32,
        credential: &str,
        mut on_retry: impl FnMut(u32, &FetchError),
    ) -> Result<RawPage, FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(query, page, credential, attempt) {
                Ok(raw_page) => return Ok(raw_page),
                Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                    on_retry(attempt, &err);
                    delay_manager::retry_backoff(self.retry_pause);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn fetch_once(
        &self,
        query: &str,
        page: u32,
        credential: &str,
        attempt: u32,
    ) -> Result<RawPage, FetchError> {
        let response = self
            .api
            .get(query, page, credential)
            .map_err(|err| match err {
                TransportError::Timeout => FetchError::Timeout { attempts: attempt },
                TransportError::Network(detail) => FetchError::Connection {
                    attempts: attempt,
                    detail,
                },
            })?;

        if response.status == 403 {
            return Err(FetchError::AuthExpired {
                detail: "HTTP 403 Forbidden".to_string(),
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(FetchError::Http {
                status: response.status,
            });
        }

        let body: Value =
            serde_json::from_str(&response.body).map_err(|err| FetchError::Malformed {
                attempts: attempt,
                detail: err.to_string(),
            })?;

        // The trial API reports a dead session inside the body of a 200.
        if let Some(message) = session_error(&body) {
            return Err(FetchError::AuthExpired { detail: message });
        }

        serde_json::from_value(body).map_err(|err| FetchError::Malformed {
            attempts: attempt,
            detail: err.to_string(),
        })
    }
}

fn session_error(body: &Value) -> Option<String> {
    let message = body.get("error")?.as_str()?;
    let lowered = message.to_lowercase();
    if lowered.contains("session") || lowered.contains("recaptcha") {
        Some(message.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Instant;

    struct FakeApi {
        script: RefCell<VecDeque<Result<RawResponse, TransportError>>>,
        calls: RefCell<u32>,
    }

    impl FakeApi {
        fn new(steps: Vec<Result<RawResponse, TransportError>>) -> Self {
            FakeApi {
                script: RefCell::new(steps.into()),
                calls: RefCell::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.borrow()
        }
    }

    impl SearchApi for FakeApi {
        fn get(&self, _: &str, page: u32, _: &str) -> Result<RawResponse, TransportError> {
            *self.calls.borrow_mut() += 1;
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request for page {page}"))
        }
    }

    fn ok_body(body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    #[test]
    fn default_policy_is_three_attempts_with_fixed_pause() {
        let api = FakeApi::new(vec![]);
        let fetcher = Fetcher::new(&api);
        assert_eq!(fetcher.max_attempts(), 3);
        assert_eq!(RETRY_PAUSE, Duration::from_secs(2));
    }

    #[test]
    fn timeout_exhausts_after_three_attempts_with_pauses() {
        let api = FakeApi::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let fetcher = Fetcher::with_policy(&api, 2, Duration::from_millis(25));

        let mut retries = Vec::new();
        let started = Instant::now();
        let err = fetcher
            .fetch_page("acme", 1, "sess", |attempt, _| retries.push(attempt))
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout { attempts: 3 }));
        assert_eq!(api.calls(), 3);
        assert_eq!(retries, vec![1, 2]);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn forbidden_surfaces_immediately_without_retry() {
        let api = FakeApi::new(vec![Ok(RawResponse {
            status: 403,
            body: "Forbidden".to_string(),
        })]);
        let fetcher = Fetcher::with_policy(&api, 2, Duration::ZERO);

        let err = fetcher
            .fetch_page("acme", 4, "sess", |_, _| panic!("must not retry"))
            .unwrap_err();

        assert!(matches!(err, FetchError::AuthExpired { .. }));
        assert_eq!(api.calls(), 1);
    }

    #[test]
    fn server_error_status_is_not_retried() {
        let api = FakeApi::new(vec![Ok(RawResponse {
            status: 500,
            body: "oops".to_string(),
        })]);
        let fetcher = Fetcher::with_policy(&api, 2, Duration::ZERO);

        let err = fetcher
            .fetch_page("acme", 1, "sess", |_, _| panic!("must not retry"))
            .unwrap_err();

        assert!(matches!(err, FetchError::Http { status: 500 }));
        assert_eq!(api.calls(), 1);
    }

    #[test]
    fn malformed_body_then_clean_body_recovers() {
        let api = FakeApi::new(vec![
            ok_body("<!doctype html>"),
            ok_body(r#"{"results": [{"businessName": "A"}], "totalPages": 3, "total": 41}"#),
        ]);
        let fetcher = Fetcher::with_policy(&api, 2, Duration::ZERO);

        let mut retries = 0;
        let page = fetcher
            .fetch_page("acme", 2, "sess", |_, err| {
                assert!(matches!(err, FetchError::Malformed { .. }));
                retries += 1;
            })
            .unwrap();

        assert_eq!(retries, 1);
        assert_eq!(api.calls(), 2);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_results, 41);
    }

    #[test]
    fn session_error_in_ok_body_is_auth_expired() {
        let api = FakeApi::new(vec![ok_body(
            r#"{"error": "Session invalid, please solve the reCAPTCHA"}"#,
        )]);
        let fetcher = Fetcher::with_policy(&api, 2, Duration::ZERO);

        let err = fetcher
            .fetch_page("acme", 1, "sess", |_, _| panic!("must not retry"))
            .unwrap_err();

        match err {
            FetchError::AuthExpired { detail } => assert!(detail.contains("reCAPTCHA")),
            other => panic!("expected AuthExpired, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_error_key_is_not_a_session_failure() {
        let api = FakeApi::new(vec![ok_body(r#"{"error": "quota exceeded", "results": []}"#)]);
        let fetcher = Fetcher::with_policy(&api, 0, Duration::ZERO);

        let page = fetcher.fetch_page("acme", 1, "sess", |_, _| {}).unwrap();
        assert!(page.results.is_empty());
    }

    #[test]
    fn sparse_body_takes_documented_defaults() {
        let api = FakeApi::new(vec![ok_body("{}")]);
        let fetcher = Fetcher::with_policy(&api, 0, Duration::ZERO);

        let page = fetcher.fetch_page("acme", 1, "sess", |_, _| {}).unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_results, 0);
    }

    #[test]
    fn connection_error_keeps_detail_and_attempt_count() {
        let api = FakeApi::new(vec![
            Err(TransportError::Network("dns failure".to_string())),
            Err(TransportError::Network("dns failure".to_string())),
        ]);
        let fetcher = Fetcher::with_policy(&api, 1, Duration::ZERO);

        let err = fetcher.fetch_page("acme", 1, "sess", |_, _| {}).unwrap_err();
        match err {
            FetchError::Connection { attempts, detail } => {
                assert_eq!(attempts, 2);
                assert_eq!(detail, "dns failure");
            }
            other => panic!("expected Connection, got {other:?}"),
        }
    }
}
