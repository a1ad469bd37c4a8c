//! Audio/visual synchronization
//!
//! Aligns the results of a linked audio stream and visual stream within a
//! target precision, tracking the clock offset between the two producers
//! and its drift rate.

pub mod clock_drift;
pub mod engine;
pub mod link;

pub use clock_drift::{DriftAction, DriftEstimate, DriftRateEstimator};
pub use engine::{RemovedLink, SyncEngine};
pub use link::{
    DriftCorrection, Link, LinkCounters, LinkReport, LinkSpec, SyncEvent, SyncOutcome, SyncedPair,
};
