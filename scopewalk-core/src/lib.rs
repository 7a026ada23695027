pub mod crawl;
pub mod data;
pub mod ingest;
pub mod limits;
pub mod model;
pub mod sessions;

pub use crawl::{CrawlOptions, CrawlSummary, execute_crawl, resume_crawls};
pub use data::{Database, StoreError};
pub use model::{Target, TargetCounters, TargetPatch, TargetSettings, UpsertOutcome, UrlRecord};
pub use sessions::SessionStore;
