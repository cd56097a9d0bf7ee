//! Session ownership: lifecycle states, the pool and call-scoped
//! leasing.

mod pool;
mod state;

pub use pool::{PoolError, Session, SessionLease, SessionPool, TransportFactory};
pub use state::SessionState;
