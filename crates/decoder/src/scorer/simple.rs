//! Последовательный скоринг в вызывающем потоке.

use acoustic::{ScoreProvider, SenoneId};
use asr_core::{AsrResult, FeatureFrame};

use super::AcousticScorer;

/// Оценивает сеноны по одному через [`ScoreProvider`].
#[derive(Debug, Clone)]
pub struct SimpleAcousticScorer<P> {
    provider: P,
}

impl<P: ScoreProvider> SimpleAcousticScorer<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: ScoreProvider> AcousticScorer for SimpleAcousticScorer<P> {
    fn name(&self) -> &str {
        "simple"
    }

    fn score_senones(&mut self, senones: &[SenoneId], frame: &FeatureFrame) -> AsrResult<Vec<f32>> {
        senones
            .iter()
            .map(|&s| self.provider.senone_score(s, &frame.values))
            .collect()
    }
}
