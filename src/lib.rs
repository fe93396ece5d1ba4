//! Hourly electricity market prices: fetch, normalize, render.
//!
//! A cycle turns the aWATTar `marketdata` response into typed,
//! hour-indexed variables (`start_timestamp_hour_<h>`,
//! `marketprice_hour_<h>`) and renders them into a 24-row table.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod fields;
pub mod flatten;
pub mod logging;
pub mod mapper;
pub mod provider;
pub mod storage;
pub mod table;
pub mod template;
pub mod url_builder;
pub mod variables;

pub use error::{CycleError, Result};
pub use provider::{PriceProvider, Snapshot};
pub use variables::{Variable, VariableMap};
