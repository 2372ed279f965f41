//! Politeness controls for scraping: randomized delays and user-agent rotation.
//!
//! Every page or detail fetch made by a [`crate::scrape::ScrapeSession`] after
//! the first waits a uniformly random duration within `[min_delay, max_delay]`
//! and presents a user agent picked at random from the configured list.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use midcoast_core::politeness::PolitenessConfig;
//!
//! let config = PolitenessConfig::new(Duration::from_secs(2), Duration::from_secs(5));
//! let delay = config.effective_delay();
//! assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(5));
//! ```

use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;

/// Desktop browser agents rotated through when none are configured.
pub const DEFAULT_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:90.0) Gecko/20100101 Firefox/90.0",
];

/// Configuration for delays between fetches and the user-agent pool.
#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    /// Lower bound of the randomized wait between successive fetches.
    pub min_delay: Duration,

    /// Upper bound of the randomized wait. Values below `min_delay` are
    /// treated as equal to it.
    pub max_delay: Duration,

    /// User agents to rotate through. Empty means [`DEFAULT_USER_AGENTS`].
    pub user_agents: Vec<String>,
}

impl PolitenessConfig {
    /// Create a config with the given delay window and the default agents.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// No delay at all. Useful for tests and local fixtures.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_user_agents(mut self, agents: Vec<String>) -> Self {
        self.user_agents = agents;
        self
    }

    /// Uniform random delay within the configured window.
    pub fn effective_delay(&self) -> Duration {
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = (self.max_delay.as_millis() as u64).max(min_ms);
        if min_ms == max_ms {
            return Duration::from_millis(min_ms);
        }
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }

    /// Pick a user agent for the next request.
    pub fn user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }

    /// Sleep for one randomized politeness interval.
    pub async fn pause(&self) {
        let delay = self.effective_delay();
        if delay.is_zero() {
            return;
        }
        tracing::debug!(sleep_ms = %delay.as_millis(), "Politeness delay");
        tokio::time::sleep(delay).await;
    }
}

impl Default for PolitenessConfig {
    /// 2-5 seconds between fetches.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(5))
    }
}
