pub mod classify;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod snapshot;
pub mod url;

pub use classify::Kind;
pub use drivers::{CrawlEvent, Extractor, NavigationDriver};
pub use engine::{
    CrawlEngine, CrawlStatus, QueueItem, SessionId, StatusCallback, StopReason, TargetSpec,
};
pub use error::{EngineError, EnqueueOutcome, EnqueueReason};
pub use fetch::HttpNavigator;
pub use snapshot::{CrawlSnapshot, MemorySnapshotStore, SnapshotStore};
pub use url::{CanonicalOpts, QueryMode};
