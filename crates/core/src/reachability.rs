//! The internet-reachability pre-check used by `deploy` and `update`.
//!
//! Not a typed error: per the propagation policy (§7), this is a pre-check
//! only and fails the operation with a plain user-facing message.

pub struct ReachabilityProbe {
    urls: Vec<String>,
    http: reqwest::Client,
}

impl ReachabilityProbe {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Reachable if at least one configured URL responds.
    pub async fn is_reachable(&self) -> bool {
        for url in &self.urls {
            if self.http.get(url).send().await.is_ok() {
                return true;
            }
        }
        false
    }
}
