//! Keel rollout: canary traffic stepping and per-key cancellation of in-flight rollouts.

#![forbid(unsafe_code)]

pub mod canary;
pub mod clock;
pub mod driver;
pub mod registry;

pub use canary::{CanaryError, CanaryState, CanaryStepper, TickOutcome, TrafficSplit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{spawn_canary, CanaryRun};
pub use registry::{CancelFn, CancellationRegistry, Cleanup};
