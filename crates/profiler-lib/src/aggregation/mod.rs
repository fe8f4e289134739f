//! Time-windowed aggregation of metric samples
//!
//! Samples are folded into fixed two-second buckets by a caller-supplied
//! accumulator. Buckets whose end falls before the window cutoff are evicted
//! on every mutation and every read, so memory stays bounded by
//! `window_length / bucket_duration`.

mod average;
mod clock;
mod windowed;

pub use average::AverageBucket;
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use windowed::{BucketData, WindowedAggregation, BUCKET_DURATION};

pub(crate) use clock::to_time_delta;
