//! Scheduling building blocks shared by the slice daemon and its tests.
//!
//! - [`Orch`]: the unit the daemon loop drives, with drift and resync ticks
//! - [`Consumer`]: per-resource queue that folds bursts of lifecycle events
//! - [`RetryPolicy`] / [`retry_with_backoff`]: in-cycle retries of transient
//!   device failures
//!
//! An orch owns its resources outright. Events land in its [`Consumer`],
//! `do_task` pops the keys that have no cycle running and starts one per
//! key, and the ticks only mark work for the next `do_task`:
//!
//! ```ignore
//! async fn do_task(&mut self) {
//!     let busy = &self.running;
//!     for task in self.events.pop_ready(|key| !busy.contains(key)) {
//!         self.start_cycle(task);
//!     }
//! }
//! ```

mod consumer;
mod orch;
mod retry;

pub use consumer::{Coalesce, Consumer, KeyedTask, Operation};
pub use orch::Orch;
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
