//! Tokio driver that ticks a [`CanaryStepper`] until it completes or is cancelled.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use keel_core::CanarySpec;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::canary::{CanaryError, CanaryStepper, TickOutcome, TrafficSplit};
use crate::clock::Clock;
use crate::registry::{CancellationRegistry, Cleanup};

/// Handles to a running canary.
pub struct CanaryRun<K: Eq + Hash + Clone> {
    /// Resolves to the stepper once the run completes or is cancelled.
    pub handle: JoinHandle<CanaryStepper>,
    /// Latest split; updated on every step.
    pub splits: watch::Receiver<TrafficSplit>,
    pub cleanup: Cleanup<K>,
}

/// Activate a canary for `key` and drive it on a tokio task.
///
/// Any run previously registered under `key` is cancelled. The task polls the stepper
/// every `tick_every`; step timing comes from `clock`. On completion the task releases its
/// registry entry itself.
pub fn spawn_canary<K>(
    registry: &CancellationRegistry<K>,
    key: K,
    spec: &CanarySpec,
    clock: Arc<dyn Clock>,
    tick_every: Duration,
) -> Result<CanaryRun<K>, CanaryError>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    let mut stepper = CanaryStepper::new();
    stepper.activate(spec, clock.now())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    let cleanup = registry.register_and_cancel_previous(key, move || cancel.cancel());
    let (tx, rx) = watch::channel(stepper.split());

    let own_cleanup = cleanup.clone();
    let period = tick_every.max(Duration::from_millis(1));
    let handle = tokio::spawn(async move {
        let generation = own_cleanup.generation();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(generation, state = stepper.state().name(), "canary cancelled");
                    break;
                }
                _ = ticker.tick() => match stepper.tick(clock.now()) {
                    TickOutcome::Advanced { step, split } => {
                        debug!(generation, step, "publishing split");
                        let _ = tx.send(split);
                    }
                    TickOutcome::Completed { split } => {
                        let _ = tx.send(split);
                        own_cleanup.invoke();
                        break;
                    }
                    TickOutcome::Idle => break,
                    TickOutcome::Skipped { .. } => {}
                },
            }
        }
        stepper
    });

    Ok(CanaryRun { handle, splits: rx, cleanup })
}
