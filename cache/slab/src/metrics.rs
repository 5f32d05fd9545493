//! Engine metrics.
//!
//! Counters are monotonic; gauges track current occupancy. Readers on an
//! admin thread see these through metriken's registry without touching
//! engine state.

use metriken::{Counter, Gauge, metric};

#[metric(name = "slab_req", description = "requests for a new slab")]
pub static SLAB_REQ: Counter = Counter::new();

#[metric(name = "slab_evict", description = "slabs evicted")]
pub static SLAB_EVICT: Counter = Counter::new();

#[metric(name = "slab_curr", description = "currently carved slabs")]
pub static SLAB_CURR: Gauge = Gauge::new();

#[metric(name = "item_req", description = "item slot allocations")]
pub static ITEM_REQ: Counter = Counter::new();

#[metric(name = "item_req_ex", description = "item slot allocation failures")]
pub static ITEM_REQ_EX: Counter = Counter::new();

#[metric(name = "item_curr", description = "current linked items")]
pub static ITEM_CURR: Gauge = Gauge::new();

#[metric(name = "item_insert", description = "items linked")]
pub static ITEM_INSERT: Counter = Counter::new();

#[metric(name = "item_remove", description = "items unlinked")]
pub static ITEM_REMOVE: Counter = Counter::new();

#[metric(name = "item_keyval_byte", description = "key + value bytes stored")]
pub static ITEM_KEYVAL_BYTE: Gauge = Gauge::new();
