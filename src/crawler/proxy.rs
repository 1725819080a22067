//! Round-robin proxy selection
//!
//! The proxy scheme comes from each URL; a missing scheme is treated as `http`.

use crate::ConfigError;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// Hands out proxy URLs in rotation, one per outgoing request
#[derive(Debug)]
pub struct RoundRobinProxy {
    urls: Vec<Url>,
    next: AtomicUsize,
}

impl RoundRobinProxy {
    /// Parses the proxy list
    ///
    /// Fails on an empty list or an unparsable entry.
    pub fn new<S: AsRef<str>>(proxies: &[S]) -> Result<Self, ConfigError> {
        if proxies.is_empty() {
            return Err(ConfigError::Validation(
                "proxy URL list is empty".to_string(),
            ));
        }

        let urls = proxies
            .iter()
            .map(|raw| parse_proxy(raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            urls,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the next proxy in the rotation
    pub fn next(&self) -> &Url {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        &self.urls[index % self.urls.len()]
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

fn parse_proxy(raw: &str) -> Result<Url, ConfigError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", raw, e)))?;

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Proxy '{}' has no host",
            raw
        )));
    }

    Ok(url)
}
