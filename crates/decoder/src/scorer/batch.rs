//! Батчевый скоринг: все сеноны кадра за один вызов.

use acoustic::{FrameScorer, SenoneId};
use asr_core::{AsrError, AsrResult, FeatureFrame};
use tracing::trace;

use super::AcousticScorer;

/// Считает вектор оценок всех сенонов через [`FrameScorer`] и выбирает
/// нужные. Выгоден, когда активных сенонов много, а скорер работает на
/// тензорах (см. `acoustic::TensorSenoneScorer`).
#[derive(Debug, Clone)]
pub struct BatchAcousticScorer<F> {
    scorer: F,
}

impl<F: FrameScorer> BatchAcousticScorer<F> {
    pub fn new(scorer: F) -> Self {
        Self { scorer }
    }
}

impl<F: FrameScorer> AcousticScorer for BatchAcousticScorer<F> {
    fn name(&self) -> &str {
        "batch"
    }

    fn score_senones(&mut self, senones: &[SenoneId], frame: &FeatureFrame) -> AsrResult<Vec<f32>> {
        let all = self.scorer.score_frame(&frame.values)?;
        trace!("Кадр {}: {} оценок, выбрано {}", frame.index, all.len(), senones.len());
        senones
            .iter()
            .map(|s| {
                all.get(s.index()).copied().ok_or_else(|| {
                    AsrError::Scoring(format!("неизвестный сенон {} (всего {})", s.0, all.len()))
                })
            })
            .collect()
    }
}
