//! Named-placeholder substitution for request URLs.
//!
//! Patterns look like `https://{provider_host}/v1/marketdata?start={epochMillis}`.
//! Values are inserted literally; callers hand in values that are already
//! safe for a URL.

use std::collections::BTreeMap;

use url::Url;

use crate::clock::Clock;
use crate::config::Setting;
use crate::error::{CycleError, Result};
use crate::logging::{log, obj, v_str, Domain, Level};

/// Placeholder carrying the current time in epoch milliseconds.
pub const EPOCH_MILLIS_KEY: &str = "epochMillis";

/// Replace every `{name}` in `pattern` with `values[name]`.
pub fn replace_named_placeholders(pattern: &str, values: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() + 32);
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            CycleError::Configuration(format!("unterminated placeholder in '{}'", pattern))
        })?;
        let name = &after[..close];
        if !is_placeholder_name(name) {
            return Err(CycleError::Configuration(format!(
                "invalid placeholder '{{{}}}' in '{}'",
                name, pattern
            )));
        }
        let value = values.get(name).ok_or_else(|| {
            CycleError::Configuration(format!("no value for placeholder '{}'", name))
        })?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Substitute configuration values plus `epochMillis` into `pattern` and parse the result.
///
/// The clock is read once per call.
pub fn build_url(pattern: &str, setting: &Setting, clock: &dyn Clock) -> Result<Url> {
    let mut values = setting.configuration_values();
    values.insert(EPOCH_MILLIS_KEY.to_string(), clock.epoch_millis().to_string());

    let url_string = replace_named_placeholders(pattern, &values)?;
    let url = Url::parse(&url_string)?;
    log(
        Level::Debug,
        Domain::Fetch,
        "url_built",
        obj(&[
            ("provider", v_str(&setting.provider_host)),
            ("url", v_str(url.as_str())),
        ]),
    );
    Ok(url)
}
