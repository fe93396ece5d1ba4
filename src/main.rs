use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use marketprice::clock::{Clock, SystemClock};
use marketprice::config::{Config, Setting};
use marketprice::connection::ReqwestConnection;
use marketprice::fields::FieldSource;
use marketprice::logging::{log, log_persisted, obj, v_str, Domain, Level};
use marketprice::provider::PriceProvider;
use marketprice::storage::PriceStore;
use marketprice::table::load_tables_path;
use serde_json::json;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let setting = Setting::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let connection = ReqwestConnection::from_setting(&setting)?;
    let mut provider = PriceProvider::new(setting, Box::new(connection))?
        .with_clock(clock.clone())
        .with_display_zone(cfg.display_zone);
    if let Some(path) = &cfg.fields_path {
        provider = provider.with_fields(FieldSource::from_path(Path::new(path))?);
    }
    if let Some(path) = &cfg.table_path {
        provider = provider.with_tables(load_tables_path(Path::new(path))?);
    }

    let mut store = PriceStore::new(&cfg.sqlite_path)?;
    store.init()?;

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("provider", v_str(provider.lock_key())),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("poll_secs", json!(cfg.poll_secs)),
            ("tables", json!(provider.tables().len())),
        ]),
    );

    loop {
        let now = clock.now();
        let in_window = cfg.activity.contains(cfg.display_zone.local_time(&now));

        if in_window || cfg.oneshot {
            // Failures are logged by the provider; the previous snapshot stays published.
            if let Ok(snapshot) = provider.run_cycle().await {
                for table in &snapshot.tables {
                    let rows = store.persist_table(snapshot.fetched_at.timestamp_millis(), table)?;
                    log_persisted(&table.name, rows);
                }
            }
        } else {
            log(
                Level::Debug,
                Domain::System,
                "outside_activity_window",
                obj(&[("provider", v_str(provider.lock_key()))]),
            );
        }

        if cfg.oneshot {
            break;
        }
        sleep(Duration::from_secs(cfg.poll_secs.max(1))).await;
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}
