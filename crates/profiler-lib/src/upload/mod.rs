//! Trace upload
//!
//! - `UploadContext`: one finished trace and how it came about
//! - `UploadCoordinator`: credential, upload and commit under bounded retries
//! - `ServiceProfilerIndex`: the entry published once a profile is committed

mod context;
mod coordinator;
pub mod index;
mod os_platform;
mod retry;

pub use context::{UploadContext, UploadContextBuilder};
pub use coordinator::{
    IndexPublisher, LoggingIndexPublisher, UploadConfig, UploadCoordinator, UploadOutcome,
};
pub use index::{ServiceProfilerIndex, ServiceProfilerIndexBuilder};
pub use os_platform::{os_platform_description, OsPlatform};
pub use retry::{
    Exhausted, RetryBudget, RetryPolicy, DEFAULT_MAX_INSTANT_RETRIES, DEFAULT_RESET_PERIOD,
};
