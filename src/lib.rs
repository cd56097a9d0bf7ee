//! chanrelay: bulk retrieval and redistribution of media-bearing
//! messages from a remote channel service, driven by a pool of
//! authenticated sessions under rate-limit supervision.
//!
//! The core flow is `fetch → group → distribute → (download | forward)
//! → report`:
//!
//! - [`session`] owns the authenticated sessions and leases them out
//!   one call at a time.
//! - [`limit`] layers global, op-class and per-session token buckets
//!   and turns service flood-waits into absorb-or-suspend decisions.
//! - [`fetch`] slices the requested id range across sessions.
//! - [`group`] folds fetched messages into atomic units (singletons
//!   and indivisible media groups).
//! - [`distribute`] bin-packs units across sessions by byte weight.
//! - [`download`] writes media to disk; [`forward`] stages media into
//!   each session's self chat, fans batches out to the destinations
//!   and reclaims the scratch.
//! - [`driver`] sequences the stages and aggregates the final report.

pub mod client;
pub mod config;
pub mod distribute;
pub mod download;
pub mod driver;
pub mod fetch;
pub mod forward;
pub mod group;
pub mod limit;
pub mod report;
pub mod session;
pub mod shutdown;
pub mod telemetry;
pub mod template;
