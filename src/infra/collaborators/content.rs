//! Lexicon-based content analysis.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::{CollaboratorError, ContentGenerator, ContentSignal};

const POSITIVE: &[&str] = &["good", "great", "love", "win", "excellent", "happy", "best", "launch"];
const NEGATIVE: &[&str] = &["bad", "hate", "fail", "poor", "sad", "worst", "broken", "delay"];

/// Scores text by counting lexicon hits. Same input, same signal.
#[derive(Debug, Clone, Default)]
pub struct StubContentGenerator {
    latency: Option<Duration>,
}

impl StubContentGenerator {
    /// Generator answering immediately.
    #[must_use]
    pub const fn new() -> Self {
        Self { latency: None }
    }

    /// Simulate a slow upstream.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Analysis of `text` without the simulated latency.
    #[must_use]
    pub fn signal_for(text: &str) -> ContentSignal {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        let positive = words.iter().filter(|w| POSITIVE.contains(&w.as_str())).count();
        let negative = words.iter().filter(|w| NEGATIVE.contains(&w.as_str())).count();

        #[allow(clippy::cast_precision_loss)]
        let (sentiment, confidence) = {
            let total = words.len().max(1) as f64;
            let sentiment = (positive as f64 - negative as f64) / total;
            let confidence = 0.05f64.mul_add(words.len() as f64, 0.3);
            (sentiment.clamp(-1.0, 1.0), confidence.clamp(0.3, 0.95))
        };
        ContentSignal {
            sentiment,
            confidence,
            degraded: false,
        }
    }
}

#[async_trait]
impl ContentGenerator for StubContentGenerator {
    async fn analyze(&self, text: &str) -> Result<ContentSignal, CollaboratorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(Self::signal_for(text))
    }
}
