//! Rate-limit controller: layered token buckets, flood-wait policy,
//! adaptive tuning.

mod bucket;
mod controller;

pub use controller::{
    AdmitError, ControllerSnapshot, FloodAction, OpClass, RateLimitController,
    SessionLimitSnapshot,
};
