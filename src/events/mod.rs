//! Lifecycle event bus
//!
//! Synchronous publish/subscribe side channel used by reporters and UIs to
//! follow a run. Core scheduling never depends on what listeners do.

mod bus;
mod types;

pub use bus::{EventBus, Listener, RecordedEvent, Subscription};
pub use types::{EventKind, RunEvent};
