use std::time::Duration;

use url::Url;

use crate::{config::TrackerConfig, magnet::MagnetLink};

/// Concatenate `custom` and `recommended`, dropping blanks and repeats.
///
/// Custom trackers keep priority: the first occurrence of a tracker decides its position.
pub fn merge_trackers<I, J>(custom: I, recommended: J) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    J: IntoIterator,
    J::Item: AsRef<str>,
{
    let mut merged: Vec<String> = Vec::new();

    let custom = custom.into_iter().map(|t| t.as_ref().trim().to_string());
    let recommended = recommended.into_iter().map(|t| t.as_ref().trim().to_string());

    for tracker in custom.chain(recommended) {
        if tracker.is_empty() || merged.contains(&tracker) {
            continue;
        }
        merged.push(tracker);
    }

    merged
}

/// Parse a published tracker list: one tracker per line, commas also accepted.
#[must_use]
pub fn parse_tracker_list(body: &str) -> Vec<String> {
    body.lines()
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Source of the trackers appended to outgoing magnet links.
pub struct TrackerSource {
    custom: Vec<String>,
    recommended_url: Option<Url>,
    client: reqwest::Client,
}

impl TrackerSource {
    /// Build a tracker source from the `[trackers]` section.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            custom: config.custom.clone(),
            recommended_url: config.recommended_url.clone(),
            client,
        })
    }

    /// A source that never adds trackers.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            custom: Vec::new(),
            recommended_url: None,
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.custom.is_empty() && self.recommended_url.is_none()
    }

    /// Fetch the recommended tracker list.
    ///
    /// Failures are logged and yield an empty list; the recommended list is never required.
    pub async fn fetch_recommended(&self) -> Vec<String> {
        let Some(url) = &self.recommended_url else {
            return Vec::new();
        };

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to fetch recommended trackers");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                url = %url,
                status = %response.status(),
                "Recommended tracker list unavailable"
            );
            return Vec::new();
        }

        match response.text().await {
            Ok(body) => {
                let trackers = parse_tracker_list(&body);
                tracing::debug!(url = %url, count = trackers.len(), "Fetched recommended trackers");
                trackers
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to read recommended tracker list");
                Vec::new()
            }
        }
    }

    /// Custom trackers followed by the recommended ones, de-duplicated.
    pub async fn effective_trackers(&self) -> Vec<String> {
        let recommended = self.fetch_recommended().await;
        merge_trackers(&self.custom, &recommended)
    }

    /// Append the effective trackers to `link`.
    pub async fn decorate(&self, link: &MagnetLink) -> MagnetLink {
        if self.is_disabled() {
            return link.clone();
        }

        let trackers = self.effective_trackers().await;
        tracing::trace!(count = trackers.len(), "Appending trackers to magnet link");
        link.with_trackers(&trackers)
    }
}
