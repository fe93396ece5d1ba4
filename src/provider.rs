//! Fetch orchestration for the aWATTar market-data API.
//!
//! One cycle builds every request URL, fetches and flattens each response,
//! maps it into a fresh [`VariableMap`], renders the tables and only then
//! publishes the result. A failing cycle leaves the previous snapshot alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::clock::{Clock, FixedClock, SystemClock};
use crate::config::{DisplayZone, Setting};
use crate::connection::{HttpConnection, CONTENT_TYPE_JSON};
use crate::error::Result;
use crate::fields::FieldSource;
use crate::flatten::flatten_json_str;
use crate::logging::{self, log, obj, v_str, Domain, Level, ProfileScope};
use crate::mapper::calculate_into;
use crate::table::{default_tables, RenderedTable, Table};
use crate::url_builder::build_url;
use crate::variables::VariableMap;

pub const BASE_URL: &str = "https://{provider_host}/v1/marketdata?start={epochMillis}";

/// Result of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub cycle_id: u64,
    pub fetched_at: DateTime<Utc>,
    pub variables: VariableMap,
    pub tables: Vec<RenderedTable>,
}

pub struct PriceProvider {
    setting: Setting,
    connection: Box<dyn HttpConnection>,
    clock: Arc<dyn Clock>,
    fields: FieldSource,
    tables: Vec<Table>,
    zone: DisplayZone,
    published: Mutex<Option<Arc<Snapshot>>>,
    cycles: AtomicU64,
}

impl PriceProvider {
    /// Provider with the shipped field definitions and table template.
    pub fn new(setting: Setting, connection: Box<dyn HttpConnection>) -> Result<Self> {
        Ok(Self {
            setting,
            connection,
            clock: Arc::new(SystemClock),
            fields: FieldSource::embedded()?,
            tables: default_tables()?,
            zone: DisplayZone::Local,
            published: Mutex::new(None),
            cycles: AtomicU64::new(0),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fields(mut self, fields: FieldSource) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_tables(mut self, tables: Vec<Table>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_display_zone(mut self, zone: DisplayZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn setting(&self) -> &Setting {
        &self.setting
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Key for serializing cycles against the same upstream host.
    pub fn lock_key(&self) -> &str {
        &self.setting.provider_host
    }

    /// Fetch every property group and map it into a fresh variable map.
    ///
    /// All URLs are built before the first request, so a configuration
    /// error never reaches the network.
    pub async fn fetch_variables(&self, now: DateTime<Utc>) -> Result<VariableMap> {
        let offset = self.setting.price_offset()?;
        let cycle_clock = FixedClock(now);

        let mut requests = Vec::with_capacity(self.fields.properties.len());
        for group in &self.fields.properties {
            let url = build_url(&group.command, &self.setting, &cycle_clock)?;
            requests.push((url, group));
        }

        let provider = self.lock_key();
        let mut vars = VariableMap::new();
        for (url, group) in requests {
            let body = self.connection.get_as_string(&url).await?;
            logging::log_fetch(provider, url.as_str(), body.len());

            let raw = flatten_json_str(&body)?;
            let stats = calculate_into(&raw, &group.fields, offset, &mut vars)?;
            logging::log_mapping(provider, raw.len(), stats.written, stats.skipped_absent);
        }
        Ok(vars)
    }

    pub fn render(&self, vars: &VariableMap) -> Vec<RenderedTable> {
        self.tables
            .iter()
            .map(|table| {
                let rendered = table.render(vars, self.zone);
                logging::log_render(&rendered.name, rendered.rows.len(), rendered.non_empty_count());
                rendered
            })
            .collect()
    }

    /// Run one fetch-and-render cycle and publish its snapshot.
    pub async fn run_cycle(&self) -> Result<Arc<Snapshot>> {
        let cycle_id = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let _scope = ProfileScope::with_context("cycle", &[("cycle_id", json!(cycle_id))]);
        let now = self.clock.now();

        let vars = match self.fetch_variables(now).await {
            Ok(vars) => vars,
            Err(err) => {
                logging::log_cycle_failed(self.lock_key(), cycle_id, err.kind(), &err.to_string());
                return Err(err);
            }
        };
        let tables = self.render(&vars);

        let snapshot = Arc::new(Snapshot {
            cycle_id,
            fetched_at: now,
            variables: vars,
            tables,
        });
        logging::log_cycle_published(
            self.lock_key(),
            cycle_id,
            snapshot.variables.len(),
            &snapshot.variables.fingerprint(),
        );
        let mut slot = self.published.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshot of the last successful cycle.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Check that `setting` reaches an API answering with JSON.
    pub async fn test_connection(&self, setting: &Setting) -> Result<String> {
        let url = build_url(BASE_URL, setting, self.clock.as_ref())?;
        self.connection.test(&url, CONTENT_TYPE_JSON).await?;
        log(
            Level::Info,
            Domain::Fetch,
            "connection_ok",
            obj(&[("provider", v_str(&setting.provider_host))]),
        );
        Ok(format!("connection to {} successful", setting.provider_host))
    }
}
