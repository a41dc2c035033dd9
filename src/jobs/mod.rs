//! Background work that outlives the request that started it.

pub mod dispatcher;
pub mod status;
pub mod watcher;

pub use dispatcher::{Accepted, JobDispatcher};
pub use status::{JobRecord, JobStatus, JobView};
pub use watcher::{ReadinessWatcher, WatchOutcome};
