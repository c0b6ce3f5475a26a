use serde::{Serialize, Deserialize};

use crate::certificate::WaitCertificate;

/// Wait timer parameters shared by every participant.
///
/// `certificate_sample_length` bounds the certificate history used as the
/// statistical sample. The verifier passes it to the history walk rather than
/// reading it from here directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub minimum_wait_time: f64,
    pub target_wait_time: f64,
    pub initial_wait_time: f64,
    pub certificate_sample_length: usize,
    pub fixed_duration_blocks: usize,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            minimum_wait_time: 1.0,
            target_wait_time: 20.0,
            initial_wait_time: 3000.0,
            certificate_sample_length: 50,
            fixed_duration_blocks: 50,
        }
    }
}

impl TimerSettings {
    /// Expected local mean for a certificate following `certificates`.
    ///
    /// While the chain is shorter than `fixed_duration_blocks` the mean moves
    /// from `target_wait_time` toward `initial_wait_time` as the sample grows.
    /// After that it is scaled by the population estimate of the sample.
    pub fn compute_local_mean(&self, certificates: &[WaitCertificate]) -> f64 {
        let count = certificates.len();
        if count < self.fixed_duration_blocks {
            let ratio = count as f64 / self.fixed_duration_blocks as f64;
            let sq = ratio * ratio;
            self.target_wait_time * (1.0 - sq) + self.initial_wait_time * sq
        } else {
            self.target_wait_time * self.population_estimate(certificates)
        }
    }

    fn population_estimate(&self, certificates: &[WaitCertificate]) -> f64 {
        let used = &certificates[..self.fixed_duration_blocks.min(certificates.len())];
        let (sum_waits, sum_means) = used.iter().fold((0.0, 0.0), |(waits, means), c| {
            (waits + c.duration() - self.minimum_wait_time, means + c.local_mean())
        });
        let n = used.len() as f64;
        (sum_means / n) / (sum_waits / n)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::certificate::{Body, WaitCertificate};

    fn cert(duration: f64, local_mean: f64) -> WaitCertificate {
        let body = Body {
            previous_certificate_id: String::from(crate::certificate::NULL_IDENTIFIER),
            local_mean,
            duration,
            request_time: 0.0,
            validator_address: String::new(),
            nonce: String::new(),
            block_hash: String::new(),
        };
        WaitCertificate::new(body, String::new(), Vec::new())
    }

    fn settings() -> TimerSettings {
        TimerSettings {
            minimum_wait_time: 1.0,
            target_wait_time: 10.0,
            initial_wait_time: 100.0,
            certificate_sample_length: 4,
            fixed_duration_blocks: 4,
        }
    }

    #[test]
    fn ramp_up() {
        let s = settings();
        assert_eq!(s.compute_local_mean(&[]), 10.0);
        // ratio 1/2 => 10 * 3/4 + 100 * 1/4
        let two = vec![cert(2.0, 1.0), cert(2.0, 1.0)];
        assert!((s.compute_local_mean(&two) - 32.5).abs() < 1e-9);
    }

    #[test]
    fn population_estimate() {
        let s = settings();
        // avg wait (5 - 1) = 4, avg mean 8 => estimate 2
        let full: Vec<WaitCertificate> = (0..4).map(|_| cert(5.0, 8.0)).collect();
        assert!((s.compute_local_mean(&full) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn only_fixed_blocks_counted() {
        let s = settings();
        let mut sample: Vec<WaitCertificate> = (0..4).map(|_| cert(5.0, 8.0)).collect();
        sample.push(cert(1000.0, 1.0));
        assert!((s.compute_local_mean(&sample) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn toml_defaults() {
        let s: TimerSettings = toml::from_str("target_wait_time = 5.0").unwrap();
        assert_eq!(s.target_wait_time, 5.0);
        assert_eq!(s.certificate_sample_length, TimerSettings::default().certificate_sample_length);
    }
}
