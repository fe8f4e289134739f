use super::BucketData;

/// Running sum and sample count for one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AverageBucket {
    sum: f64,
    count: u64,
}

impl AverageBucket {
    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the samples in this bucket, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Sample-weighted mean across buckets
    ///
    /// Empty buckets contribute nothing. Returns `None` when no bucket holds a sample.
    pub fn combined_mean(buckets: &[AverageBucket]) -> Option<f64> {
        let (sum, count) = buckets
            .iter()
            .fold((0.0, 0u64), |(sum, count), b| (sum + b.sum, count + b.count));

        (count > 0).then(|| sum / count as f64)
    }
}

impl BucketData<f64> for AverageBucket {
    fn update(&mut self, sample: f64) {
        self.sum += sample;
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bucket_has_no_mean() {
        assert_eq!(AverageBucket::default().mean(), None);
        assert_eq!(AverageBucket::combined_mean(&[]), None);
        assert_eq!(
            AverageBucket::combined_mean(&[AverageBucket::default(), AverageBucket::default()]),
            None
        );
    }

    #[test]
    fn test_combined_mean_is_sample_weighted() {
        let mut busy = AverageBucket::default();
        busy.update(90.0);
        busy.update(90.0);
        busy.update(90.0);

        let mut quiet = AverageBucket::default();
        quiet.update(10.0);

        // (270 + 10) / 4, not (90 + 10) / 2
        assert_eq!(AverageBucket::combined_mean(&[busy, quiet]), Some(70.0));
    }
}
