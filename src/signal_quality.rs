use crate::types::SatelliteSample;

/// Indoor/outdoor judgement from satellite visibility.
///
/// Each call is a pure function of the latest sample. There is no history, so a
/// single bad sample flips the verdict: fast reaction is preferred over stability.
#[derive(Clone, Debug)]
pub struct SignalQualityClassifier {
    min_used_satellites: usize,
    min_mean_snr: f64,
    last_verdict: Option<bool>,
}

impl SignalQualityClassifier {
    pub fn new(min_used_satellites: usize, min_mean_snr: f64) -> Self {
        Self { min_used_satellites, min_mean_snr, last_verdict: None }
    }

    /// Returns `true` when the sample looks like an indoor environment.
    pub fn update(&mut self, sample: &SatelliteSample) -> bool {
        let indoor = self.classify(sample);
        if self.last_verdict != Some(indoor) {
            log::debug!(
                "[signal] {} satellites, verdict {}",
                sample.satellite_count(),
                if indoor { "indoor" } else { "outdoor" }
            );
        }
        self.last_verdict = Some(indoor);
        indoor
    }

    pub fn classify(&self, sample: &SatelliteSample) -> bool {
        if sample.satellite_count() == 0 {
            return true;
        }

        let (used_count, snr_sum) = sample
            .used()
            .fold((0usize, 0.0f64), |(n, sum), s| (n + 1, sum + s.snr));

        if used_count < self.min_used_satellites || used_count == 0 {
            return true;
        }

        let mean_snr = snr_sum / used_count as f64;
        mean_snr < self.min_mean_snr
    }

    /// Verdict of the most recent `update`, if any sample has been seen.
    pub fn last_verdict(&self) -> Option<bool> {
        self.last_verdict
    }
}

impl Default for SignalQualityClassifier {
    fn default() -> Self {
        Self::new(4, 25.0)
    }
}
