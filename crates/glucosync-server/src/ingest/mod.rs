//! Data ingestion
//!
//! # Architecture
//!
//! - **source**: the `(cursor, window) -> page` adapter contract and the
//!   shared commit-then-advance drain loop
//! - **xdrip**: xDrip+ database export adapter (zip + SQLite)
//! - **nightscout**: Nightscout REST adapter (yearly windows, start probe)
//! - **import**: bounded worker pool over queued uploads
//! - **sync**: per-target sync engine and the interval scheduler
//! - **lock**: per-target lock shared by imports and sync runs

pub mod import;
pub mod lock;
pub mod nightscout;
pub mod source;
pub mod sync;
pub mod xdrip;

pub use import::{AdapterRegistry, ImportAdapter, ImportPipeline, ImportPipelineConfig, ImportRequest, TempUpload};
pub use lock::{TargetGuard, TargetLocks};
pub use nightscout::{NightscoutConfig, NightscoutService};
pub use source::{drain_stream, DrainStats, Page, PageOrder, StreamSource, Window, WindowPlan};
pub use sync::{SyncEngine, SyncScheduler, SyncService, SyncServiceRegistry, SyncStream, SyncTrigger};
pub use xdrip::XdripAdapter;
