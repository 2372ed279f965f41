use std::time::Duration;

use midcoast_core::error::AppError;
use midcoast_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use url::Url;

/// HTTP fetcher using reqwest.
///
/// The user agent is set per request so the scrape session can rotate it.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, AppError> {
        validate_scheme(url)?;

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

/// Only `http` and `https` URLs are fetched.
fn validate_scheme(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::HttpError(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_schemes_allowed() {
        assert!(validate_scheme("https://maine.craigslist.org/search/rea").is_ok());
        assert!(validate_scheme("http://localhost:8080/notices").is_ok());
    }

    #[test]
    fn test_other_schemes_rejected() {
        assert!(validate_scheme("file:///etc/passwd").is_err());
        assert!(validate_scheme("ftp://example.com/x").is_err());
        assert!(validate_scheme("not a url").is_err());
    }

    #[tokio::test]
    async fn test_rejected_scheme_never_hits_network() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch("file:///tmp/x", "ua").await.unwrap_err();
        assert!(matches!(err, AppError::HttpError(_)));
    }
}
