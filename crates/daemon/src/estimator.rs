use std::collections::BTreeMap;
use std::path::Path;
use log::warn;
use crate::config::WatchdogConfig;

/// Bytes per GB as used for every size reported by the daemon
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Why the estimator accepted or rejected a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Expected savings clear the threshold
    WorthIt,
    /// Codec ratio at or above the no-benefit ratio
    DiminishingReturns,
    /// Savings below `min_savings_gb`
    BelowThreshold,
    /// Estimation failed; the file is attempted anyway
    FailedOpen,
}

impl Verdict {
    /// Reason tag recorded in the skip statistics
    pub fn skip_reason(&self) -> Option<&'static str> {
        match self {
            Verdict::DiminishingReturns => Some("diminishing-returns codec"),
            Verdict::BelowThreshold => Some("savings below threshold"),
            Verdict::WorthIt | Verdict::FailedOpen => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub original_gb: f64,
    /// None when the estimate failed open
    pub estimated_output_gb: Option<f64>,
    pub ratio: f64,
    pub verdict: Verdict,
}

impl Estimate {
    pub fn worth_it(&self) -> bool {
        matches!(self.verdict, Verdict::WorthIt | Verdict::FailedOpen)
    }
}

/// Cost/benefit estimator for re-encoding a source codec to HEVC
#[derive(Debug, Clone)]
pub struct Estimator {
    ratios: BTreeMap<String, f64>,
    default_ratio: f64,
    no_benefit_ratio: f64,
    min_savings_gb: f64,
}

impl Estimator {
    pub fn new(
        ratios: BTreeMap<String, f64>,
        default_ratio: f64,
        no_benefit_ratio: f64,
        min_savings_gb: f64,
    ) -> Self {
        let ratios = ratios
            .into_iter()
            .map(|(codec, ratio)| (codec.to_lowercase(), ratio))
            .collect();
        Self {
            ratios,
            default_ratio,
            no_benefit_ratio,
            min_savings_gb,
        }
    }

    pub fn from_config(cfg: &WatchdogConfig) -> Self {
        Self::new(
            cfg.codec_ratios.clone(),
            cfg.default_ratio,
            cfg.no_benefit_ratio,
            cfg.min_savings_gb,
        )
    }

    /// Expected output/input ratio; unknown codecs get the conservative default
    pub fn ratio(&self, codec: &str) -> f64 {
        self.ratios
            .get(&codec.to_lowercase())
            .copied()
            .unwrap_or(self.default_ratio)
    }

    /// Estimate output size and decide whether conversion pays off
    pub fn estimate(&self, codec: &str, file_size_bytes: u64) -> Estimate {
        let ratio = self.ratio(codec);
        let original_gb = bytes_to_gb(file_size_bytes);
        let estimated_gb = original_gb * ratio;

        let verdict = if ratio >= self.no_benefit_ratio {
            Verdict::DiminishingReturns
        } else if original_gb - estimated_gb < self.min_savings_gb {
            Verdict::BelowThreshold
        } else {
            Verdict::WorthIt
        };

        Estimate {
            original_gb,
            estimated_output_gb: Some(estimated_gb),
            ratio,
            verdict,
        }
    }

    /// Estimate for a file on disk. A stat failure fails open so the file
    /// is still attempted.
    pub fn estimate_file(&self, codec: &str, path: &Path) -> Estimate {
        match std::fs::metadata(path) {
            Ok(meta) => self.estimate(codec, meta.len()),
            Err(e) => {
                warn!("Estimator could not stat {}: {} - attempting anyway", path.display(), e);
                Estimate {
                    original_gb: 0.0,
                    estimated_output_gb: None,
                    ratio: self.ratio(codec),
                    verdict: Verdict::FailedOpen,
                }
            }
        }
    }
}
