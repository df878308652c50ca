//! The `Orch` trait: one unit of work driven by the daemon loop.

use async_trait::async_trait;

/// An orchestration agent owning a set of declarative resources.
///
/// The daemon never reaches into an orch's state. It only calls
/// [`do_task`](Orch::do_task) whenever something may have changed and
/// forwards its two periodic ticks:
///
/// * [`on_timer`](Orch::on_timer) for the drift-check period
/// * [`on_resync`](Orch::on_resync) for the resync period
///
/// Timer hooks must not block; they only mark work, which the next
/// `do_task` picks up.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Name used in logs and dumps.
    fn name(&self) -> &str;

    /// Moves queued work forward without waiting on it.
    async fn do_task(&mut self);

    /// Lower runs first when several orchs share a loop.
    fn priority(&self) -> i32 {
        0
    }

    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// One line per queued or running item.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }

    /// Drift-check tick.
    fn on_timer(&mut self) {}

    /// Resync tick: re-queue whatever has not converged.
    fn on_resync(&mut self) {}
}
