//! Structured JSON-lines logging for fetch cycles.
//!
//! Records go to stdout and, when `LOG_DIR` is set, to
//! `<LOG_DIR>/<run_id>/events.jsonl` (trace and debug to `trace.jsonl`).
//! `LOG_LEVEL` and `LOG_DOMAINS` are read once per process.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

const REDACTED_KEYS: [&str; 4] = ["authorization", "Authorization", "api_key", "token"];
const PROMOTED_KEYS: [&str; 3] = ["provider", "cycle_id", "table"];

// =============================================================================
// Levels and domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn parse(raw: &str) -> Option<Self> {
        let level = match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => return None,
        };
        Some(level)
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info)
    }

    fn is_verbose(self) -> bool {
        self <= Level::Debug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Config,
    Fetch,
    Mapping,
    Render,
    Storage,
    System,
    Profile,
}

impl Domain {
    const ALL: [Domain; 7] = [
        Domain::Config,
        Domain::Fetch,
        Domain::Mapping,
        Domain::Render,
        Domain::Storage,
        Domain::System,
        Domain::Profile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Domain::Config => "config",
            Domain::Fetch => "fetch",
            Domain::Mapping => "mapping",
            Domain::Render => "render",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Domain::ALL.into_iter().find(|d| d.name() == name)
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Which records are written. `domains == None` lets every domain through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub min_level: Level,
    pub domains: Option<Vec<Domain>>,
}

impl Filter {
    /// Parse a `LOG_DOMAINS` value: comma separated names, or `all`.
    pub fn parse_domains(raw: &str) -> Option<Vec<Domain>> {
        if raw.trim() == "all" {
            return None;
        }
        Some(raw.split(',').filter_map(|d| Domain::from_name(d.trim())).collect())
    }

    fn from_env() -> Self {
        Self {
            min_level: Level::from_env(),
            domains: std::env::var("LOG_DOMAINS").ok().and_then(|v| Filter::parse_domains(&v)),
        }
    }

    pub fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level
            && self.domains.as_ref().map_or(true, |ds| ds.contains(&domain))
    }
}

// =============================================================================
// Run context
// =============================================================================

type Sink = Mutex<BufWriter<File>>;

struct Logger {
    run_id: String,
    filter: Filter,
    events: Option<Sink>,
    trace: Option<Sink>,
    seq: AtomicU64,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("mp-{}-{}", Utc::now().timestamp_millis(), std::process::id()));
        let (events, trace) = match std::env::var("LOG_DIR") {
            Ok(base) => open_run_dir(&Path::new(&base).join(&run_id), &run_id),
            Err(_) => (None, None),
        };
        Logger {
            run_id,
            filter: Filter::from_env(),
            events,
            trace,
            seq: AtomicU64::new(0),
        }
    })
}

fn open_run_dir(dir: &Path, run_id: &str) -> (Option<Sink>, Option<Sink>) {
    if let Err(err) = fs::create_dir_all(dir) {
        eprintln!("[log] cannot create {}: {}", dir.display(), err);
        return (None, None);
    }
    let manifest = json!({
        "run_id": run_id,
        "started_at": now_rfc3339(),
        "pid": std::process::id(),
        "crate_version": env!("CARGO_PKG_VERSION"),
    });
    if let Err(err) = fs::write(dir.join("manifest.json"), manifest.to_string()) {
        eprintln!("[log] cannot write manifest: {}", err);
    }
    let open = |name: &str| match File::create(dir.join(name)) {
        Ok(file) => Some(Mutex::new(BufWriter::new(file))),
        Err(err) => {
            eprintln!("[log] cannot open {}: {}", name, err);
            None
        }
    };
    (open("events.jsonl"), open("trace.jsonl"))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// Records
// =============================================================================

/// One JSON line.
#[derive(Debug, Serialize)]
struct Record<'a> {
    ts: String,
    run_id: &'a str,
    seq: u64,
    lvl: Level,
    component: &'static str,
    event: &'a str,
    msg: String,
    #[serde(flatten)]
    promoted: Map<String, Value>,
    data: Map<String, Value>,
}

impl<'a> Record<'a> {
    fn new(
        run_id: &'a str,
        seq: u64,
        level: Level,
        domain: Domain,
        event: &'a str,
        mut fields: Map<String, Value>,
    ) -> Self {
        for key in REDACTED_KEYS {
            if let Some(v) = fields.get_mut(key) {
                *v = Value::String("[REDACTED]".into());
            }
        }
        let msg = match fields.remove("msg") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let promoted = PROMOTED_KEYS
            .iter()
            .filter_map(|k| fields.remove(*k).map(|v| (k.to_string(), v)))
            .collect();
        Record {
            ts: now_rfc3339(),
            run_id,
            seq,
            lvl: level,
            component: domain.name(),
            event,
            msg,
            promoted,
            data: fields,
        }
    }
}

fn append(sink: Option<&Sink>, line: &str) {
    let Some(sink) = sink else { return };
    if let Ok(mut w) = sink.lock() {
        let _ = writeln!(w, "{}", line).and_then(|_| w.flush());
    }
}

/// Write a record if `level` and `domain` pass the process filter.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let logger = logger();
    if !logger.filter.allows(level, domain) {
        return;
    }
    let seq = logger.seq.fetch_add(1, Ordering::Relaxed);
    let record = Record::new(&logger.run_id, seq, level, domain, event, fields);
    let line = match serde_json::to_string(&record) {
        Ok(line) => line,
        Err(err) => {
            eprintln!("[log] unserializable record {}: {}", event, err);
            return;
        }
    };
    let sink = if level.is_verbose() { &logger.trace } else { &logger.events };
    append(sink.as_ref(), &line);
    println!("{}", line);
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

// =============================================================================
// Cycle events
// =============================================================================

pub fn log_fetch(provider: &str, url: &str, bytes: usize) {
    log(
        Level::Info,
        Domain::Fetch,
        "fetched",
        obj(&[("provider", v_str(provider)), ("url", v_str(url)), ("bytes", json!(bytes))]),
    );
}

pub fn log_mapping(provider: &str, raw_keys: usize, written: usize, skipped_absent: usize) {
    log(
        Level::Debug,
        Domain::Mapping,
        "mapped",
        obj(&[
            ("provider", v_str(provider)),
            ("raw_keys", json!(raw_keys)),
            ("written", json!(written)),
            ("skipped_absent", json!(skipped_absent)),
        ]),
    );
}

pub fn log_render(table: &str, rows: usize, non_empty: usize) {
    log(
        Level::Debug,
        Domain::Render,
        "rendered",
        obj(&[("table", v_str(table)), ("rows", json!(rows)), ("non_empty", json!(non_empty))]),
    );
}

pub fn log_cycle_published(provider: &str, cycle_id: u64, variables: usize, fingerprint: &str) {
    log(
        Level::Info,
        Domain::System,
        "cycle_published",
        obj(&[
            ("provider", v_str(provider)),
            ("cycle_id", json!(cycle_id)),
            ("variables", json!(variables)),
            ("fingerprint", v_str(fingerprint)),
        ]),
    );
}

pub fn log_cycle_failed(provider: &str, cycle_id: u64, kind: &str, error: &str) {
    log(
        Level::Error,
        Domain::System,
        "cycle_failed",
        obj(&[
            ("provider", v_str(provider)),
            ("cycle_id", json!(cycle_id)),
            ("kind", v_str(kind)),
            ("msg", v_str(error)),
        ]),
    );
}

pub fn log_persisted(table: &str, rows: usize) {
    log(
        Level::Info,
        Domain::Storage,
        "persisted",
        obj(&[("table", v_str(table)), ("rows", json!(rows))]),
    );
}

// =============================================================================
// Profiling scope
// =============================================================================

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fraction of scopes to report, from `PROFILE_SAMPLE` (default 1.0).
fn profile_rate() -> f64 {
    static RATE: OnceLock<f64> = OnceLock::new();
    *RATE.get_or_init(|| {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map_or(1.0, |p| p.clamp(0.0, 1.0))
    })
}

/// Whether the `n`th scope is reported at `rate`. Spreads hits evenly.
fn sampled(n: u64, rate: f64) -> bool {
    ((n + 1) as f64 * rate).floor() > (n as f64 * rate).floor()
}

/// Logs elapsed milliseconds under `Domain::Profile` when dropped.
pub struct ProfileScope {
    label: &'static str,
    started: Instant,
    fields: Option<Map<String, Value>>,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let n = PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            label,
            started: Instant::now(),
            fields: sampled(n, profile_rate()).then(|| obj(fields)),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let Some(mut fields) = self.fields.take() else { return };
        fields.insert("label".into(), v_str(self.label));
        fields.insert("elapsed_ms".into(), json!(self.started.elapsed().as_secs_f64() * 1000.0));
        log(Level::Trace, Domain::Profile, "scope_elapsed", fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parse_and_order() {
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warn));
        assert_eq!(Level::parse("loud"), None);
        assert!(Level::Debug < Level::Info && Level::Error < Level::Fatal);
        assert!(Level::Trace.is_verbose() && !Level::Info.is_verbose());
    }

    #[test]
    fn filter_respects_level_and_domains() {
        let filter = Filter {
            min_level: Level::Info,
            domains: Filter::parse_domains("fetch, storage,bogus"),
        };
        assert_eq!(filter.domains, Some(vec![Domain::Fetch, Domain::Storage]));
        assert!(filter.allows(Level::Warn, Domain::Fetch));
        assert!(!filter.allows(Level::Debug, Domain::Fetch));
        assert!(!filter.allows(Level::Error, Domain::Render));
        assert_eq!(Filter::parse_domains("all"), None);
    }

    #[test]
    fn record_promotes_and_redacts() {
        let fields = obj(&[
            ("provider", v_str("api.awattar.de")),
            ("msg", v_str("ok")),
            ("token", v_str("secret")),
            ("bytes", json!(12)),
        ]);
        let record = Record::new("mp-test", 7, Level::Info, Domain::Fetch, "fetched", fields);
        let record = serde_json::to_value(record).unwrap();
        assert_eq!(record["run_id"], "mp-test");
        assert_eq!(record["seq"], 7);
        assert_eq!(record["lvl"], "INFO");
        assert_eq!(record["component"], "fetch");
        assert_eq!(record["provider"], "api.awattar.de");
        assert_eq!(record["msg"], "ok");
        assert_eq!(record["data"]["token"], "[REDACTED]");
        assert_eq!(record["data"]["bytes"], 12);
        assert!(record["data"].get("provider").is_none());
    }

    #[test]
    fn sampling_spreads_hits() {
        assert!((0..10).all(|n| sampled(n, 1.0)));
        assert!((0..10).all(|n| !sampled(n, 0.0)));
        assert_eq!((0..100).filter(|&n| sampled(n, 0.25)).count(), 25);
    }
}
