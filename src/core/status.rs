use serde::Serialize;
use std::fmt;

/// Counters streamed alongside a generation. Reset whenever a new user turn
/// is submitted.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetrics {
    pub tokens_per_second: Option<f64>,
    pub token_count: Option<u64>,
    pub image_progress_fraction: Option<f64>,
    pub image_generation_elapsed_ms: Option<f64>,
}

impl GenerationMetrics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_text(&mut self, tps: f64, token_count: u64) {
        self.tokens_per_second = Some(tps);
        self.token_count = Some(token_count);
    }

    pub fn record_image(&mut self, fraction: Option<f64>, elapsed_ms: Option<f64>) {
        self.image_progress_fraction = fraction;
        self.image_generation_elapsed_ms = elapsed_ms;
    }
}

/// Human-facing status derived from [`GenerationMetrics`].
///
/// Text metrics win over image metrics whenever both are present. A zero
/// rate or zero fraction counts as absent.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GenerationStatus {
    Idle,
    Streaming {
        tokens_per_second: f64,
        token_count: u64,
    },
    TextComplete {
        tokens_per_second: f64,
        token_count: u64,
        elapsed_secs: f64,
    },
    ImageRunning {
        percent: f64,
    },
    ImageComplete {
        elapsed_secs: f64,
    },
}

impl GenerationStatus {
    pub fn aggregate(metrics: &GenerationMetrics, running: bool, transcript_len: usize) -> Self {
        if transcript_len == 0 {
            return GenerationStatus::Idle;
        }

        if let Some(tps) = metrics.tokens_per_second.filter(|tps| *tps > 0.0) {
            let token_count = metrics.token_count.unwrap_or(0);
            return if running {
                GenerationStatus::Streaming {
                    tokens_per_second: tps,
                    token_count,
                }
            } else {
                GenerationStatus::TextComplete {
                    tokens_per_second: tps,
                    token_count,
                    elapsed_secs: token_count as f64 / tps,
                }
            };
        }

        if let Some(fraction) = metrics.image_progress_fraction.filter(|f| *f > 0.0) {
            return if running {
                GenerationStatus::ImageRunning {
                    percent: round2(fraction * 100.0),
                }
            } else {
                GenerationStatus::ImageComplete {
                    elapsed_secs: metrics.image_generation_elapsed_ms.unwrap_or(0.0) / 1000.0,
                }
            };
        }

        GenerationStatus::Idle
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, GenerationStatus::Idle)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationStatus::Idle => Ok(()),
            GenerationStatus::Streaming { tokens_per_second, .. } => {
                write!(f, "{:.2} tokens/second", tokens_per_second)
            }
            GenerationStatus::TextComplete {
                tokens_per_second,
                token_count,
                elapsed_secs,
            } => write!(
                f,
                "Generated {} tokens in {:.2} seconds ({:.2} tokens/second).",
                token_count, elapsed_secs, tokens_per_second
            ),
            GenerationStatus::ImageRunning { percent } => {
                write!(f, "Generating image... ({:.2}%)", percent)
            }
            GenerationStatus::ImageComplete { elapsed_secs } => {
                write!(f, "Generated image in {:.2} seconds.", elapsed_secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_metrics() -> GenerationMetrics {
        GenerationMetrics {
            tokens_per_second: Some(12.5),
            token_count: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_streaming_text_status() {
        let status = GenerationStatus::aggregate(&text_metrics(), true, 2);
        assert_eq!(status.to_string(), "12.50 tokens/second");
    }

    #[test]
    fn test_completed_text_status() {
        let status = GenerationStatus::aggregate(&text_metrics(), false, 2);
        assert_eq!(
            status.to_string(),
            "Generated 2 tokens in 0.16 seconds (12.50 tokens/second)."
        );
    }

    #[test]
    fn test_text_takes_precedence_over_image() {
        let mut metrics = text_metrics();
        metrics.record_image(Some(0.5), Some(1500.0));
        assert!(matches!(
            GenerationStatus::aggregate(&metrics, true, 2),
            GenerationStatus::Streaming { .. }
        ));
        assert!(matches!(
            GenerationStatus::aggregate(&metrics, false, 2),
            GenerationStatus::TextComplete { .. }
        ));
    }

    #[test]
    fn test_image_status() {
        let mut metrics = GenerationMetrics::default();
        metrics.record_image(Some(0.123456), Some(3210.0));
        assert_eq!(
            GenerationStatus::aggregate(&metrics, true, 2).to_string(),
            "Generating image... (12.35%)"
        );
        assert_eq!(
            GenerationStatus::aggregate(&metrics, false, 2).to_string(),
            "Generated image in 3.21 seconds."
        );
    }

    #[test]
    fn test_idle_without_metrics_or_messages() {
        assert!(GenerationStatus::aggregate(&GenerationMetrics::default(), true, 3).is_idle());
        assert!(GenerationStatus::aggregate(&text_metrics(), false, 0).is_idle());
        assert_eq!(GenerationStatus::Idle.to_string(), "");
    }

    #[test]
    fn test_zero_rate_counts_as_unset() {
        let mut metrics = GenerationMetrics {
            tokens_per_second: Some(0.0),
            token_count: Some(0),
            ..Default::default()
        };
        assert!(GenerationStatus::aggregate(&metrics, true, 1).is_idle());
        metrics.record_image(Some(0.25), None);
        assert!(matches!(
            GenerationStatus::aggregate(&metrics, true, 1),
            GenerationStatus::ImageRunning { .. }
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut metrics = text_metrics();
        metrics.record_image(Some(0.5), Some(10.0));
        metrics.reset();
        assert_eq!(metrics, GenerationMetrics::default());
    }
}
