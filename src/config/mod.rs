use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::LoadBalancerPolicy;
use crate::core::{Result, RouterError};

/// Consistency requirement applied to reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    /// Any replica will do.
    None,
    /// Reads must observe the caller's own prior writes.
    #[default]
    ReadYourWrites,
    /// Every read goes to a primary.
    Strong,
}

/// Routing layer configuration. Immutable once the façade is built.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pgresolver::{ConsistencyLevel, RouterConfig};
///
/// let config = RouterConfig::new()
///     .enabled(true)
///     .level(ConsistencyLevel::ReadYourWrites)
///     .lsn_query_timeout(Duration::from_secs(2))
///     .cookie_name("pg_min_lsn");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Master switch for LSN-aware routing. Off means plain read/write
    /// splitting with no causal tracking.
    pub enabled: bool,

    /// Consistency level applied to reads.
    pub level: ConsistencyLevel,

    /// Route to a primary when no replica satisfies the LSN requirement;
    /// when off, such reads fail instead.
    pub fallback_to_primary: bool,

    /// Per-call deadline for the WAL-position queries.
    #[serde(with = "duration_secs")]
    pub lsn_query_timeout: Duration,

    /// Name of the causal-token cookie.
    pub cookie_name: String,

    /// Cookie lifetime. Pick a value above your average replication lag.
    #[serde(with = "duration_secs")]
    pub cookie_max_age: Duration,

    /// Emit the `Secure` cookie attribute.
    pub cookie_secure: bool,

    /// Backend selection policy.
    pub load_balancer_policy: LoadBalancerPolicy,
}

pub const DEFAULT_COOKIE_NAME: &str = "pg_min_lsn";

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: ConsistencyLevel::ReadYourWrites,
            fallback_to_primary: true,
            lsn_query_timeout: Duration::from_secs(5),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_max_age: Duration::from_secs(300),
            cookie_secure: false,
            load_balancer_policy: LoadBalancerPolicy::RoundRobin,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn level(mut self, level: ConsistencyLevel) -> Self {
        self.level = level;
        self
    }

    pub fn fallback_to_primary(mut self, fallback: bool) -> Self {
        self.fallback_to_primary = fallback;
        self
    }

    pub fn lsn_query_timeout(mut self, timeout: Duration) -> Self {
        self.lsn_query_timeout = timeout;
        self
    }

    pub fn cookie_name(mut self, name: &str) -> Self {
        self.cookie_name = name.to_string();
        self
    }

    pub fn cookie_max_age(mut self, max_age: Duration) -> Self {
        self.cookie_max_age = max_age;
        self
    }

    pub fn cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    pub fn load_balancer_policy(mut self, policy: LoadBalancerPolicy) -> Self {
        self.load_balancer_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cookie_name.is_empty() {
            return Err(RouterError::Config("cookie_name cannot be empty".into()));
        }
        if self
            .cookie_name
            .bytes()
            .any(|b| b.is_ascii_whitespace() || b == b';' || b == b'=' || b == b',')
        {
            return Err(RouterError::Config(format!(
                "cookie_name {:?} contains characters invalid in a cookie",
                self.cookie_name
            )));
        }
        if self.lsn_query_timeout.is_zero() {
            return Err(RouterError::Config(
                "lsn_query_timeout must be greater than zero".into(),
            ));
        }
        if self.cookie_max_age.is_zero() {
            return Err(RouterError::Config(
                "cookie_max_age must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RouterConfig::default();

        assert!(!config.enabled);
        assert_eq!(config.level, ConsistencyLevel::ReadYourWrites);
        assert!(config.fallback_to_primary);
        assert_eq!(config.lsn_query_timeout, Duration::from_secs(5));
        assert_eq!(config.cookie_name, "pg_min_lsn");
        assert_eq!(config.cookie_max_age, Duration::from_secs(300));
        assert!(!config.cookie_secure);
        assert_eq!(config.load_balancer_policy, LoadBalancerPolicy::RoundRobin);
    }

    #[test]
    fn builder_chains() {
        let config = RouterConfig::new()
            .enabled(true)
            .level(ConsistencyLevel::Strong)
            .fallback_to_primary(false)
            .lsn_query_timeout(Duration::from_millis(750))
            .cookie_name("session_lsn")
            .cookie_max_age(Duration::from_secs(60))
            .cookie_secure(true)
            .load_balancer_policy(LoadBalancerPolicy::Random);

        assert!(config.enabled);
        assert_eq!(config.level, ConsistencyLevel::Strong);
        assert!(!config.fallback_to_primary);
        assert_eq!(config.lsn_query_timeout, Duration::from_millis(750));
        assert_eq!(config.cookie_name, "session_lsn");
        assert!(config.cookie_secure);
        assert_eq!(config.load_balancer_policy, LoadBalancerPolicy::Random);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(RouterConfig::new().cookie_name("").validate().is_err());
        assert!(RouterConfig::new()
            .cookie_name("has space")
            .validate()
            .is_err());
        assert!(RouterConfig::new()
            .cookie_name("a=b")
            .validate()
            .is_err());
        assert!(RouterConfig::new()
            .lsn_query_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RouterConfig::new()
            .cookie_max_age(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RouterConfig::new().validate().is_ok());
    }

    #[test]
    fn serde_round_trip() {
        let config = RouterConfig::new()
            .enabled(true)
            .cookie_max_age(Duration::from_secs(120));
        let json = serde_json::to_string(&config).unwrap();
        let back: RouterConfig = serde_json::from_str(&json).unwrap();

        assert!(back.enabled);
        assert_eq!(back.cookie_max_age, Duration::from_secs(120));
        assert_eq!(back.cookie_name, config.cookie_name);
    }
}
