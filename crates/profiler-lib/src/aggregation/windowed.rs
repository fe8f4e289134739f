//! Bucketed sliding-window aggregation
//!
//! `WindowedAggregation` keeps a time-ordered run of fixed-duration buckets.
//! The active bucket receives samples until its end time passes, at which
//! point it is sealed into the tracked sequence and a fresh bucket is opened.
//!
//! With `track_current_bucket` the active bucket is visible to readers
//! immediately (partial data); without it only sealed buckets are returned.

use super::{to_time_delta, TimeSource};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Fixed duration of every bucket
pub const BUCKET_DURATION: Duration = Duration::from_secs(2);

/// Per-bucket accumulator
///
/// A fresh bucket starts from `Default::default()` and folds in every sample
/// routed to it. The aggregation never looks inside the payload.
pub trait BucketData<T>: Clone + Default + Send {
    fn update(&mut self, sample: T);
}

#[derive(Debug, Clone)]
struct TimestampedBucket<U> {
    end: DateTime<Utc>,
    data: U,
}

impl<U: Default> TimestampedBucket<U> {
    fn open(end: DateTime<Utc>) -> Self {
        Self {
            end,
            data: U::default(),
        }
    }
}

#[derive(Debug)]
struct Buckets<U> {
    /// Sealed buckets, strictly ordered by end time
    sealed: VecDeque<TimestampedBucket<U>>,
    /// Bucket currently receiving samples
    current: TimestampedBucket<U>,
}

/// Sliding window of aggregated samples
pub struct WindowedAggregation<T, U> {
    window_length: chrono::Duration,
    bucket_duration: chrono::Duration,
    track_current_bucket: bool,
    time_source: Arc<dyn TimeSource>,
    buckets: Mutex<Buckets<U>>,
    _sample: PhantomData<fn(T)>,
}

impl<T, U: BucketData<T>> WindowedAggregation<T, U> {
    /// Create an aggregation whose first bucket ends one bucket duration from now
    pub fn new(
        window_length: Duration,
        track_current_bucket: bool,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let bucket_duration = to_time_delta(BUCKET_DURATION);
        let first = TimestampedBucket::open(time_source.now() + bucket_duration);

        Self {
            window_length: to_time_delta(window_length),
            bucket_duration,
            track_current_bucket,
            time_source,
            buckets: Mutex::new(Buckets {
                sealed: VecDeque::new(),
                current: first,
            }),
            _sample: PhantomData,
        }
    }

    /// Length of the sliding window
    pub fn window_length(&self) -> Duration {
        self.window_length.to_std().unwrap_or_default()
    }

    /// Whether the in-progress bucket is visible to readers
    pub fn tracks_current_bucket(&self) -> bool {
        self.track_current_bucket
    }

    /// Route a sample into the active bucket, rolling over first if it has expired
    pub fn update(&self, sample: T) {
        let now = self.time_source.now();
        let mut buckets = self.lock();

        if now >= buckets.current.end {
            self.roll_over(&mut buckets, now);
        }

        buckets.current.data.update(sample);
    }

    /// Aggregated payloads of every bucket inside the window, oldest first
    ///
    /// Evicts stale buckets but never rolls the active bucket over.
    pub fn get_data(&self) -> Vec<U> {
        self.snapshot().into_iter().map(|(_, data)| data).collect()
    }

    /// Like `get_data`, paired with each bucket's end time
    pub fn snapshot(&self) -> Vec<(DateTime<Utc>, U)> {
        let now = self.time_source.now();
        let cutoff = now - self.window_length;
        let mut buckets = self.lock();

        Self::evict(&mut buckets.sealed, cutoff);

        let mut data: Vec<(DateTime<Utc>, U)> = buckets
            .sealed
            .iter()
            .map(|bucket| (bucket.end, bucket.data.clone()))
            .collect();

        if self.track_current_bucket && buckets.current.end >= cutoff {
            data.push((buckets.current.end, buckets.current.data.clone()));
        }

        data
    }

    fn roll_over(&self, buckets: &mut Buckets<U>, now: DateTime<Utc>) {
        let next = TimestampedBucket::open(now + self.bucket_duration);
        let completed = std::mem::replace(&mut buckets.current, next);
        buckets.sealed.push_back(completed);

        Self::evict(&mut buckets.sealed, now - self.window_length);
    }

    fn evict(sealed: &mut VecDeque<TimestampedBucket<U>>, cutoff: DateTime<Utc>) {
        while let Some(oldest) = sealed.front() {
            if oldest.end < cutoff {
                sealed.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buckets<U>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}
