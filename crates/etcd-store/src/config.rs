//! Store connection settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// `etcd_conf` block of the plugin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtcdConf {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Per-request timeout such as `"500ms"`, `"3s"` or `"1m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl EtcdConf {
    /// Parsed request timeout. Unparseable values fall back to one second.
    pub fn request_timeout(&self) -> Duration {
        match self.timeout.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_REQUEST_TIMEOUT,
            Some(raw) => parse_duration(raw).unwrap_or(Duration::from_secs(1)),
        }
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (amount, unit) = raw.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(timeout: Option<&str>) -> EtcdConf {
        EtcdConf {
            timeout: timeout.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_timeout_units() {
        assert_eq!(conf(Some("250ms")).request_timeout(), Duration::from_millis(250));
        assert_eq!(conf(Some("3s")).request_timeout(), Duration::from_secs(3));
        assert_eq!(conf(Some("2m")).request_timeout(), Duration::from_secs(120));
        assert_eq!(conf(Some("7")).request_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_request_timeout_fallbacks() {
        assert_eq!(conf(None).request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(conf(Some("")).request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(conf(Some("soon")).request_timeout(), Duration::from_secs(1));
    }
}
