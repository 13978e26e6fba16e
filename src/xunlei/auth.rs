use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use super::{XunleiError, api::XunleiApi};

static UIAUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"function\s+uiauth\s*\([^)]*\)\s*\{\s*return\s*["']([^"']+)["']"#)
        .expect("uiauth pattern should compile")
});

/// Source of the `pan_auth` session token.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `XunleiError::Auth` or a transport error if no token can be obtained.
    async fn pan_auth(&self, api: &XunleiApi) -> Result<String, XunleiError>;

    /// Forget a cached token so the next call obtains a fresh one.
    async fn invalidate(&self) {}
}

/// A fixed, configured token.
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn pan_auth(&self, _api: &XunleiApi) -> Result<String, XunleiError> {
        Ok(self.0.clone())
    }
}

/// Scrapes the token from the web UI page on first use and caches it.
#[derive(Default)]
pub struct ScrapedCredential {
    cached: Mutex<Option<String>>,
}

impl ScrapedCredential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialProvider for ScrapedCredential {
    async fn pan_auth(&self, api: &XunleiApi) -> Result<String, XunleiError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let page = api.index_page().await?;
        let token = extract_pan_auth(&page).ok_or_else(|| {
            XunleiError::Auth("uiauth token not found in web UI page".to_string())
        })?;

        tracing::debug!("Scraped pan_auth token from web UI");
        *cached = Some(token.clone());

        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

/// Find the literal returned by the page's `uiauth` function.
#[must_use]
pub fn extract_pan_auth(page: &str) -> Option<String> {
    UIAUTH_PATTERN
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_from_script() {
        let page = r#"<script>function uiauth(value){ return "eyJhbGciOi.token" }</script>"#;
        assert_eq!(extract_pan_auth(page).as_deref(), Some("eyJhbGciOi.token"));

        let spaced = "function  uiauth ( v ) {\n    return 'abc123'\n}";
        assert_eq!(extract_pan_auth(spaced).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_function_yields_none() {
        assert!(extract_pan_auth("<html><body>login</body></html>").is_none());
        assert!(extract_pan_auth("function other(){ return \"x\" }").is_none());
    }
}
