//! Pure domain logic: configuration, status records, datapoint translation,
//! chunk reassembly, reconnect scheduling, probe aggregation, SQL guarding.
//! No I/O lives here.

pub mod backoff;
pub mod chunks;
pub mod config;
pub mod datapoint;
pub mod error;
pub mod sql_guard;
pub mod status;
pub mod window;
