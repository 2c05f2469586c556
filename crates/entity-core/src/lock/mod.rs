//! Lock Manager / Critical-Section Protocol.

mod critical_section;
mod manager;
mod ordering;

pub use critical_section::{CriticalSectionScope, LockReleaseSink};
pub use manager::{enqueue_backlog, forcible_release_offline, release_lock, request_lock, LockAcquisition};
pub use ordering::{sort_targets, verify_sorted};
