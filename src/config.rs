use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::error::{CycleError, Result};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::mapper::parse_decimal;

/// Configuration key holding the manual price offset.
pub const PRICE_OFFSET_KEY: &str = "awattar_price";
/// Placeholder name under which the provider host is exposed to URL patterns.
pub const PROVIDER_HOST_KEY: &str = "provider_host";

pub const DEFAULT_PROVIDER_HOST: &str = "api.awattar.de";
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Provider-side setting, immutable for the duration of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub provider_host: String,
    pub read_timeout_ms: u64,
    pub values: BTreeMap<String, String>,
}

impl Default for Setting {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        values.insert(PRICE_OFFSET_KEY.to_string(), "0.00".to_string());
        Self {
            provider_host: DEFAULT_PROVIDER_HOST.to_string(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            values,
        }
    }
}

impl Setting {
    pub fn from_env() -> Self {
        let mut setting = Setting::default();
        if let Ok(host) = std::env::var("PROVIDER_HOST") {
            setting.provider_host = host;
        }
        setting.read_timeout_ms = std::env::var("READ_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_READ_TIMEOUT_MS);
        if let Ok(offset) = std::env::var("AWATTAR_PRICE") {
            setting.values.insert(PRICE_OFFSET_KEY.to_string(), offset);
        }
        setting
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Configuration values as seen by URL patterns, provider host included.
    pub fn configuration_values(&self) -> BTreeMap<String, String> {
        let mut values = self.values.clone();
        values
            .entry(PROVIDER_HOST_KEY.to_string())
            .or_insert_with(|| self.provider_host.clone());
        values
    }

    /// Manual price offset; missing means zero.
    pub fn price_offset(&self) -> Result<Decimal> {
        match self.values.get(PRICE_OFFSET_KEY) {
            None => Ok(Decimal::ZERO),
            Some(raw) if raw.trim().is_empty() => Ok(Decimal::ZERO),
            Some(raw) => parse_decimal(raw).ok_or_else(|| {
                CycleError::Configuration(format!(
                    "{} is not a decimal: '{}'",
                    PRICE_OFFSET_KEY, raw
                ))
            }),
        }
    }

    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }
}

/// Zone used when timestamps are rendered for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl DisplayZone {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.to_lowercase().as_str() {
            "utc" | "z" => return Some(DisplayZone::Utc),
            "local" => return Some(DisplayZone::Local),
            _ => {}
        }
        let (sign, rest) = match raw.as_bytes().first()? {
            b'+' => (1, &raw[1..]),
            b'-' => (-1, &raw[1..]),
            _ => return None,
        };
        let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
        let h: i32 = h.parse().ok()?;
        let m: i32 = m.parse().ok()?;
        if !(0..24).contains(&h) || !(0..60).contains(&m) {
            return None;
        }
        FixedOffset::east_opt(sign * (h * 3600 + m * 60)).map(DisplayZone::Fixed)
    }

    /// Format an instant with a chrono strftime string in this zone.
    pub fn format(&self, ts: &DateTime<Utc>, fmt: &str) -> String {
        match self {
            DisplayZone::Utc => ts.format(fmt).to_string(),
            DisplayZone::Local => ts.with_timezone(&Local).format(fmt).to_string(),
            DisplayZone::Fixed(offset) => ts.with_timezone(offset).format(fmt).to_string(),
        }
    }

    pub fn local_time(&self, ts: &DateTime<Utc>) -> NaiveTime {
        match self {
            DisplayZone::Utc => ts.time(),
            DisplayZone::Local => ts.with_timezone(&Local).time(),
            DisplayZone::Fixed(offset) => ts.with_timezone(offset).time(),
        }
    }
}

/// Daily window in which the host requests prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub interval_secs: u64,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(1, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            interval_secs: 3600,
        }
    }
}

impl Activity {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// Host-side configuration for the polling binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub poll_secs: u64,
    pub oneshot: bool,
    pub display_zone: DisplayZone,
    pub fields_path: Option<String>,
    pub table_path: Option<String>,
    pub activity: Activity,
}

impl Config {
    pub fn from_env() -> Self {
        let activity = Activity::default();
        let poll_secs = std::env::var("POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(activity.interval_secs);
        let oneshot = std::env::var("ONESHOT")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let sqlite_path =
            std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./prices.sqlite".to_string());
        Self {
            sqlite_path,
            poll_secs,
            oneshot,
            display_zone: display_zone_or_local(std::env::var("DISPLAY_TZ").ok().as_deref()),
            fields_path: std::env::var("FIELDS_PATH").ok(),
            table_path: std::env::var("TABLE_PATH").ok(),
            activity,
        }
    }
}

/// `Local` when unset; an unrecognized zone is reported and also falls back to `Local`.
pub fn display_zone_or_local(raw: Option<&str>) -> DisplayZone {
    let Some(raw) = raw else {
        return DisplayZone::Local;
    };
    DisplayZone::parse(raw).unwrap_or_else(|| {
        log(
            Level::Warn,
            Domain::Config,
            "display_zone_unrecognized",
            obj(&[
                ("value", v_str(raw)),
                ("fallback", v_str("local")),
                ("msg", v_str("expected utc, local or +HH:MM")),
            ]),
        );
        DisplayZone::Local
    })
}
