//! Refresh orchestration.
//!
//! ```text
//! RefreshScheduler --> RequestCoalescer --> QuoteProvider
//!        |                                      |
//!        |              SeriesShaper <----------+
//!        v
//!   SnapshotCache
//! ```

mod backoff;
mod coalescer;
mod scheduler;
mod state;

pub use backoff::Backoff;
pub use coalescer::RequestCoalescer;
pub use scheduler::RefreshScheduler;
pub use state::{KeyState, RefreshPhase};
