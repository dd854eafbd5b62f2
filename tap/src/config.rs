//! Client configuration.
//!
//! One [`TapConfig`] per client instance, there is no process-wide state.
//! Configs are plain serde structs and can be kept as JSON files:
//!
//! ```json
//! {
//!   "service": {"name": "Gaia", "tap_url": "https://gea.esac.esa.int/tap-server/tap"},
//!   "row_limit": 500,
//!   "poll": {"interval": 1.0, "backoff": 1.5, "max_interval": 10.0, "timeout": 600},
//!   "cache": {"enabled": true}
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TapError, TapResult};
use crate::poller::PollPolicy;
use crate::services::{Archive, ServiceConfig};

/// On-disk response cache settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Cache directory, `~/.tap_cache` when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapConfig {
    pub service: ServiceConfig,
    /// Row limit applied to every query (`MAXREC`); `None` leaves it to the service
    #[serde(default)]
    pub row_limit: Option<u64>,
    #[serde(default)]
    pub poll: PollPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-request HTTP timeout
    #[serde(default, with = "optional_seconds")]
    pub request_timeout: Option<Duration>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("tap/{}", env!("CARGO_PKG_VERSION"))
}

impl TapConfig {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            service,
            row_limit: None,
            poll: PollPolicy::default(),
            cache: CacheConfig::default(),
            request_timeout: Some(Duration::from_secs(60)),
            user_agent: default_user_agent(),
        }
    }

    pub fn for_archive(archive: Archive) -> Self {
        Self::new(archive.config())
    }

    pub fn with_row_limit(mut self, row_limit: u64) -> Self {
        self.row_limit = Some(row_limit);
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Row cap that applies to a synchronous query: the smaller of the
    /// requested (else configured) limit and the service's own cap.
    pub fn sync_row_cap(&self, requested: Option<u64>) -> Option<u64> {
        match (requested.or(self.row_limit), self.service.sync_row_cap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn validate(&self) -> TapResult<()> {
        url::Url::parse(&self.service.tap_url).map_err(|e| {
            TapError::Config(format!("invalid TAP URL '{}': {e}", self.service.tap_url))
        })?;
        if self.service.formats.is_empty() {
            return Err(TapError::Config(format!(
                "service {} lists no output formats",
                self.service.name
            )));
        }
        if !self.service.supports(self.service.default_format) {
            return Err(TapError::Config(format!(
                "default format {} is not among the formats of {}",
                self.service.default_format, self.service.name
            )));
        }
        self.poll.validate()
    }

    pub fn load(path: &Path) -> TapResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TapConfig = serde_json::from_str(&text)
            .map_err(|e| TapError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> TapResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| TapError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// `Duration` as fractional seconds.
pub(crate) mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// `Option<Duration>` as fractional seconds or null.
pub(crate) mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
