//! Cache state sidecar model
//!
//! [`RepodataState`] is the typed form of `<base>.state.json`. Loading goes
//! through [`RepodataState::migrate`], which tolerates older spellings and
//! drops entries it cannot trust instead of failing.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::app::hash::Blake2Hash;
use crate::constants::state::*;

/// Optional transport formats whose support is checked and remembered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepodataFormat {
    /// `repodata.json.zst`
    Zst,
    /// `repodata.jlap`
    Jlap,
}

impl RepodataFormat {
    /// State key holding this format's capability flag
    pub fn key(self) -> &'static str {
        match self {
            RepodataFormat::Zst => "has_zst",
            RepodataFormat::Jlap => "has_jlap",
        }
    }
}

/// Capability flag with the time it was last decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCheck {
    pub value: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_checked: DateTime<Utc>,
}

/// Position in the remote `.jlap` reached by the last incremental fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JlapState {
    /// Lower-cased response headers of the last `.jlap` fetch
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Chain checksum of the line before the footer
    #[serde(default)]
    pub iv: String,
    /// Byte offset of the footer line
    #[serde(default)]
    pub pos: u64,
    /// Last footer object, including `latest`
    #[serde(default)]
    pub footer: Value,
}

impl JlapState {
    /// Parsed IV, or `None` when absent or not valid hex
    pub fn iv_hash(&self) -> Option<Blake2Hash> {
        Blake2Hash::from_hex(&self.iv).ok()
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag").map(String::as_str)
    }
}

/// Metadata describing one cached repodata document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepodataState {
    #[serde(rename = "_url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "_etag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "_mod", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(rename = "_cache_control", skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Hash of the upstream document this copy is equivalent to
    #[serde(rename = "blake2_256_nominal", skip_serializing_if = "Option::is_none")]
    pub nominal_hash: Option<String>,
    /// Hash of the exact bytes on disk
    #[serde(rename = "blake2_256", skip_serializing_if = "Option::is_none")]
    pub on_disk_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_zst: Option<FormatCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_jlap: Option<FormatCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jlap: Option<JlapState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_ns: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// When the document was last confirmed current
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_ns: Option<i64>,
}

impl RepodataState {
    /// Build a state from raw JSON, accepting legacy layouts
    ///
    /// Unprefixed validator keys are renamed, non-string validators are
    /// dropped, and malformed `has_*` or `jlap` entries are discarded with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns a description when `value` is not a JSON object.
    pub fn migrate(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("state is not a JSON object".to_string());
        };

        for (legacy, key) in LEGACY_ALIASES {
            if let Some(v) = map.remove(*legacy) {
                map.entry(key.to_string()).or_insert(v);
            }
        }

        let jlap = map.remove(JLAP_KEY).and_then(|v| {
            serde_json::from_value::<JlapState>(v)
                .map_err(|e| warn!("Dropping malformed jlap state: {}", e))
                .ok()
        });

        Ok(Self {
            url: take_string(&mut map, URL_KEY),
            etag: take_string(&mut map, ETAG_KEY),
            last_modified: take_string(&mut map, LAST_MODIFIED_KEY),
            cache_control: take_string(&mut map, CACHE_CONTROL_KEY),
            nominal_hash: take_string(&mut map, NOMINAL_HASH_KEY),
            on_disk_hash: take_string(&mut map, ON_DISK_HASH_KEY),
            has_zst: take_format(&mut map, RepodataFormat::Zst),
            has_jlap: take_format(&mut map, RepodataFormat::Jlap),
            jlap,
            mtime_ns: map.remove(MTIME_KEY).and_then(|v| v.as_i64()),
            size: map.remove(SIZE_KEY).and_then(|v| v.as_u64()),
            refresh_ns: map.remove(REFRESH_KEY).and_then(|v| v.as_i64()),
        })
    }

    fn format_slot(&mut self, format: RepodataFormat) -> &mut Option<FormatCheck> {
        match format {
            RepodataFormat::Zst => &mut self.has_zst,
            RepodataFormat::Jlap => &mut self.has_jlap,
        }
    }

    /// Remembered support for `format`; unknown formats are assumed supported
    pub fn has_format(&self, format: RepodataFormat) -> (bool, Option<DateTime<Utc>>) {
        let check = match format {
            RepodataFormat::Zst => self.has_zst,
            RepodataFormat::Jlap => self.has_jlap,
        };
        match check {
            Some(check) => (check.value, Some(check.last_checked)),
            None => (true, None),
        }
    }

    pub fn set_has_format(&mut self, format: RepodataFormat, value: bool, now: DateTime<Utc>) {
        *self.format_slot(format) = Some(FormatCheck {
            value,
            last_checked: now,
        });
    }

    pub fn clear_has_format(&mut self, format: RepodataFormat) {
        *self.format_slot(format) = None;
    }

    /// Whether `format` should be tried on this fetch
    ///
    /// True when it is believed supported, or when a negative answer is older
    /// than `interval`.
    pub fn should_check_format(
        &self,
        format: RepodataFormat,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> bool {
        match self.has_format(format) {
            (true, _) => true,
            (false, Some(when)) => (now - when)
                .to_std()
                .map(|elapsed| elapsed > interval)
                .unwrap_or(false),
            (false, None) => false,
        }
    }

    /// Time of the last confirmed refresh
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.refresh_ns.map(|ns| Utc.timestamp_nanos(ns))
    }

    /// Record a confirmed refresh at `now`
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.refresh_ns = now.timestamp_nanos_opt();
    }

    /// Seconds the document may be served without revalidation
    ///
    /// `local_ttl` 0 means never, 1 means the `Cache-Control` max-age (or one
    /// second without a usable header), anything larger is the TTL itself.
    pub fn max_age(&self, local_ttl: u64) -> u64 {
        match local_ttl {
            0 => 0,
            1 => self
                .cache_control
                .as_deref()
                .and_then(cache_control_max_age)
                .unwrap_or(1),
            ttl => ttl,
        }
    }

    /// Whether the document must be revalidated before use
    pub fn stale(&self, now: DateTime<Utc>, local_ttl: u64) -> bool {
        if local_ttl == 0 {
            return true;
        }
        let Some(checked) = self.last_checked() else {
            return true;
        };
        let elapsed = (now - checked).to_std().unwrap_or_default();
        elapsed >= Duration::from_secs(self.max_age(local_ttl))
    }

    /// Seconds until the document becomes stale, negative once it is
    pub fn timeout(&self, now: DateTime<Utc>, local_ttl: u64) -> f64 {
        let Some(checked) = self.last_checked() else {
            return 0.0;
        };
        let elapsed = (now - checked).num_milliseconds() as f64 / 1000.0;
        self.max_age(local_ttl) as f64 - elapsed
    }

    /// Whether the recorded fingerprint describes the given stat
    pub fn fingerprint_matches(&self, mtime_ns: i64, size: u64) -> bool {
        self.mtime_ns == Some(mtime_ns) && self.size == Some(size)
    }

    pub fn set_fingerprint(&mut self, mtime_ns: i64, size: u64) {
        self.mtime_ns = Some(mtime_ns);
        self.size = Some(size);
    }

    /// Forget everything that describes the document's content
    ///
    /// Capability flags and the URL survive; validators, hashes, the JLAP
    /// position and the fingerprint do not.
    pub fn make_cold(&mut self) {
        self.etag = None;
        self.last_modified = None;
        self.cache_control = None;
        self.nominal_hash = None;
        self.on_disk_hash = None;
        self.jlap = None;
        self.mtime_ns = None;
        self.size = None;
        self.refresh_ns = None;
    }
}

/// `max-age` seconds from a Cache-Control header value
pub fn cache_control_max_age(value: &str) -> Option<u64> {
    value.split(',').find_map(|directive| {
        let directive = directive.trim();
        let (name, seconds) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        seconds.trim().parse().ok()
    })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => {
            warn!("Ignoring non-string {} in cache state: {}", key, other);
            None
        }
    }
}

fn take_format(map: &mut Map<String, Value>, format: RepodataFormat) -> Option<FormatCheck> {
    let key = format.key();
    let raw = map.remove(key)?;
    let check = raw.as_object().and_then(|entry| {
        let value = entry.get("value")?.as_bool()?;
        let last_checked = parse_timestamp(entry.get("last_checked")?)?;
        Some(FormatCheck {
            value,
            last_checked,
        })
    });
    if check.is_none() {
        warn!("Dropping malformed {} in cache state: {}", key, raw);
    }
    check
}

/// Seconds since the epoch, or an RFC 3339 string as older releases wrote
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn refreshed(cache_control: Option<&str>) -> RepodataState {
        let mut state = RepodataState {
            cache_control: cache_control.map(str::to_string),
            ..Default::default()
        };
        state.refresh(at(0));
        state
    }

    #[test]
    fn test_ttl_zero_always_stale() {
        let state = refreshed(Some("public, max-age=3600"));
        assert!(state.stale(at(0), 0));
        assert!(state.stale(at(1), 0));
    }

    #[test]
    fn test_max_age_respected() {
        let state = refreshed(Some("public, max-age=30"));
        assert!(!state.stale(at(29), 1));
        assert!(state.stale(at(31), 1));
        assert!((state.timeout(at(10), 1) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_cache_control_falls_through() {
        for header in ["max-age=abc", "no-cache", "max-age=", "max-age=-5", ""] {
            let state = refreshed(Some(header));
            assert!(state.stale(at(2), 1), "{header:?} should fall back to the TTL");
            assert!(!state.stale(at(2), 60), "{header:?} with TTL 60");
        }
    }

    #[test]
    fn test_explicit_ttl() {
        let state = refreshed(Some("max-age=1"));
        assert!(!state.stale(at(59), 60));
        assert!(state.stale(at(60), 60));
    }

    #[test]
    fn test_never_refreshed_is_stale() {
        let state = RepodataState::default();
        assert!(state.stale(at(0), 3600));
    }

    #[test]
    fn test_cache_control_max_age() {
        assert_eq!(cache_control_max_age("public, max-age=1200"), Some(1200));
        assert_eq!(cache_control_max_age("MAX-AGE=5"), Some(5));
        assert_eq!(cache_control_max_age("s-maxage=5"), None);
        assert_eq!(cache_control_max_age("max-age=\"5\""), None);
    }

    #[test]
    fn test_format_probation() {
        let interval = Duration::from_secs(7 * 24 * 60 * 60);
        let mut state = RepodataState::default();
        assert_eq!(state.has_format(RepodataFormat::Zst), (true, None));
        assert!(state.should_check_format(RepodataFormat::Zst, at(0), interval));

        state.set_has_format(RepodataFormat::Zst, false, at(0));
        assert_eq!(state.has_format(RepodataFormat::Zst), (false, Some(at(0))));
        assert!(!state.should_check_format(RepodataFormat::Zst, at(3600), interval));
        assert!(state.should_check_format(RepodataFormat::Zst, at(8 * 24 * 3600), interval));
        // Jlap is tracked independently
        assert!(state.should_check_format(RepodataFormat::Jlap, at(3600), interval));

        state.clear_has_format(RepodataFormat::Zst);
        assert_eq!(state.has_format(RepodataFormat::Zst), (true, None));
    }

    #[test]
    fn test_serialized_keys() {
        let mut state = RepodataState {
            url: Some("https://conda.anaconda.org/conda-forge/noarch/repodata.json".into()),
            etag: Some("\"abc\"".into()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
            nominal_hash: Some("11".repeat(32)),
            on_disk_hash: Some("22".repeat(32)),
            ..Default::default()
        };
        state.set_has_format(RepodataFormat::Jlap, true, at(0));
        state.set_fingerprint(42, 7);

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["_etag"], "\"abc\"");
        assert_eq!(value["_mod"], "Mon, 01 Jan 2024 00:00:00 GMT");
        assert_eq!(value["blake2_256_nominal"], "11".repeat(32));
        assert_eq!(value["blake2_256"], "22".repeat(32));
        assert_eq!(value["has_jlap"]["value"], true);
        assert_eq!(value["has_jlap"]["last_checked"], 1_700_000_000);
        assert_eq!(value["mtime_ns"], 42);
        assert!(value.get("has_zst").is_none());
        assert!(value.get("_cache_control").is_none());

        assert_eq!(RepodataState::migrate(value).unwrap(), state);
    }

    #[test]
    fn test_migrate_legacy_state() {
        let raw = json!({
            "url": "https://example.com/repodata.json",
            "etag": "W/\"1\"",
            "mod": "yesterday",
            "cache_control": "max-age=60",
            "has_zst": {"value": false, "last_checked": "2023-11-14T22:13:20.000000Z"},
            "has_jlap": {"value": "yes"},
            "jlap": {"iv": "00", "pos": "not a number"},
            "size": 10,
            "unknown": [1, 2, 3]
        });
        let state = RepodataState::migrate(raw).unwrap();
        assert_eq!(state.url.as_deref(), Some("https://example.com/repodata.json"));
        assert_eq!(state.etag.as_deref(), Some("W/\"1\""));
        assert_eq!(state.last_modified.as_deref(), Some("yesterday"));
        assert_eq!(state.cache_control.as_deref(), Some("max-age=60"));
        assert_eq!(
            state.has_zst,
            Some(FormatCheck {
                value: false,
                last_checked: at(0)
            })
        );
        assert_eq!(state.has_jlap, None);
        assert_eq!(state.jlap, None);
        assert_eq!(state.size, Some(10));
    }

    #[test]
    fn test_migrate_prefers_prefixed_keys() {
        let raw = json!({"_etag": "new", "etag": "old", "_mod": 5});
        let state = RepodataState::migrate(raw).unwrap();
        assert_eq!(state.etag.as_deref(), Some("new"));
        assert_eq!(state.last_modified, None);
    }

    #[test]
    fn test_migrate_rejects_non_object() {
        assert!(RepodataState::migrate(json!([1, 2])).is_err());
    }

    #[test]
    fn test_make_cold_keeps_capabilities() {
        let mut state = refreshed(Some("max-age=30"));
        state.url = Some("u".into());
        state.etag = Some("e".into());
        state.nominal_hash = Some("n".into());
        state.jlap = Some(JlapState::default());
        state.set_fingerprint(1, 2);
        state.set_has_format(RepodataFormat::Zst, false, at(0));

        state.make_cold();
        assert_eq!(state.etag, None);
        assert_eq!(state.nominal_hash, None);
        assert_eq!(state.jlap, None);
        assert_eq!(state.refresh_ns, None);
        assert!(!state.fingerprint_matches(1, 2));
        assert_eq!(state.url.as_deref(), Some("u"));
        assert!(state.has_zst.is_some());
        assert!(state.stale(at(1), 60));
    }
}
