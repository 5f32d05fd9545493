//! Front-end metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "connections accepted since start"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(name = "connections_active", description = "currently open connections")]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "request_parse", description = "requests parsed")]
pub static REQUEST_PARSE: Counter = Counter::new();

#[metric(name = "request_parse_ex", description = "request parse errors")]
pub static REQUEST_PARSE_EX: Counter = Counter::new();

#[metric(name = "cache_gets", description = "GET keys processed")]
pub static GETS: Counter = Counter::new();

#[metric(name = "cache_sets", description = "store commands processed")]
pub static SETS: Counter = Counter::new();

#[metric(name = "cache_deletes", description = "DELETE commands processed")]
pub static DELETES: Counter = Counter::new();

#[metric(name = "cache_flushes", description = "FLUSH commands processed")]
pub static FLUSHES: Counter = Counter::new();

#[metric(name = "cache_hits", description = "lookup hits")]
pub static HITS: Counter = Counter::new();

#[metric(name = "cache_misses", description = "lookup misses")]
pub static MISSES: Counter = Counter::new();
