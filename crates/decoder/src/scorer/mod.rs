//! Акустический скоринг токенов.
//!
//! Скорер получает сеноны эмитирующих токенов и кадр признаков и
//! возвращает лог-правдоподобия. Чтение кадра из источника, разбор
//! сигналов и применение оценок к токенам общие для всех стратегий и
//! выполняются в [`calculate_scores`].
//!
//! Стратегии:
//! - [`SimpleAcousticScorer`] — последовательно в вызывающем потоке;
//! - [`ThreadedAcousticScorer`] — пул рабочих потоков, сеноны режутся на куски;
//! - [`BatchAcousticScorer`] — все сеноны кадра за один проход [`acoustic::FrameScorer`].

mod batch;
mod simple;
mod threaded;

pub use batch::BatchAcousticScorer;
pub use simple::SimpleAcousticScorer;
pub use threaded::ThreadedAcousticScorer;

use std::collections::HashMap;

use acoustic::SenoneId;
use asr_core::{AsrResult, Data, FeatureFrame, FrameSource, Signal};
use linguist::SearchState;
use tracing::{debug, error};

use crate::token::{TokenArena, TokenId};

/// Оценка сенонов для одного кадра.
pub trait AcousticScorer: Send {
    /// Имя стратегии (для логов).
    fn name(&self) -> &str;

    /// Подготовить ресурсы (например, запустить пул потоков).
    fn allocate(&mut self) -> AsrResult<()> {
        Ok(())
    }

    fn deallocate(&mut self) {}

    fn start_recognition(&mut self) {}

    fn stop_recognition(&mut self) {}

    /// Лог-правдоподобия `senones` для кадра, в том же порядке.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Scoring` при некорректном кадре.
    fn score_senones(&mut self, senones: &[SenoneId], frame: &FeatureFrame) -> AsrResult<Vec<f32>>;
}

impl<T: AcousticScorer + ?Sized> AcousticScorer for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn allocate(&mut self) -> AsrResult<()> {
        (**self).allocate()
    }

    fn deallocate(&mut self) {
        (**self).deallocate()
    }

    fn start_recognition(&mut self) {
        (**self).start_recognition()
    }

    fn stop_recognition(&mut self) {
        (**self).stop_recognition()
    }

    fn score_senones(&mut self, senones: &[SenoneId], frame: &FeatureFrame) -> AsrResult<Vec<f32>> {
        (**self).score_senones(senones, frame)
    }
}

/// Результат скоринга одного кадра.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// Кадр оценён; лучший токен.
    Scored(TokenId),
    /// Сигнал конца речи или потока.
    Signal(Signal),
    /// Данных больше нет (или скоринг не удался).
    Exhausted,
}

/// Сдвигает оценки токенов кадра так, чтобы лучшая стала нулевой.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxScoreNormalizer;

impl MaxScoreNormalizer {
    pub fn normalize<S: SearchState>(&self, arena: &mut TokenArena<S>, tokens: &[TokenId], best: TokenId) {
        let max_score = arena.get(best).score();
        for &id in tokens {
            if arena.get(id).is_scored() {
                arena.get_mut(id).normalize_score(max_score);
            }
        }
    }
}

/// Прочитать следующий кадр и оценить эмитирующие токены.
///
/// Сигналы начала потока и речи пропускаются; конец речи или потока
/// возвращается как [`ScoreOutcome::Signal`]. Ошибки источника и
/// скорера логируются и завершают высказывание
/// ([`ScoreOutcome::Exhausted`]). Лучший токен — первый с максимальной
/// оценкой.
pub fn calculate_scores<S: SearchState>(
    scorer: &mut dyn AcousticScorer,
    normalizer: Option<&MaxScoreNormalizer>,
    arena: &mut TokenArena<S>,
    tokens: &[TokenId],
    source: &mut dyn FrameSource,
) -> ScoreOutcome {
    let frame = loop {
        match source.next_data() {
            Ok(Some(Data::Frame(frame))) => break frame,
            Ok(Some(Data::Signal(signal))) if signal.ends_utterance() => {
                return ScoreOutcome::Signal(signal);
            }
            Ok(Some(Data::Signal(signal))) => debug!("Скорер: пропущен сигнал {signal:?}"),
            Ok(None) => return ScoreOutcome::Exhausted,
            Err(err) => {
                error!("Скорер {}: ошибка источника кадров: {err}", scorer.name());
                return ScoreOutcome::Exhausted;
            }
        }
    };
    if tokens.is_empty() {
        return ScoreOutcome::Exhausted;
    }

    // Уникальные сеноны: многие токены делят одно распределение.
    let mut index: HashMap<SenoneId, usize> = HashMap::new();
    let mut senones = Vec::new();
    for &id in tokens {
        if let Some(senone) = arena.get(id).state().senone() {
            index.entry(senone).or_insert_with(|| {
                senones.push(senone);
                senones.len() - 1
            });
        }
    }

    let scores = match scorer.score_senones(&senones, &frame) {
        Ok(scores) if scores.len() == senones.len() => scores,
        Ok(scores) => {
            error!(
                "Скорер {}: {} оценок на {} сенонов",
                scorer.name(),
                scores.len(),
                senones.len()
            );
            return ScoreOutcome::Exhausted;
        }
        Err(err) => {
            error!("Скорер {}: кадр {}: {err}", scorer.name(), frame.index);
            return ScoreOutcome::Exhausted;
        }
    };

    let mut best: Option<TokenId> = None;
    for &id in tokens {
        let Some(senone) = arena.get(id).state().senone() else {
            continue;
        };
        let Some(&slot) = index.get(&senone) else {
            continue;
        };
        arena.get_mut(id).apply_acoustic_score(scores[slot]);
        let better = best.is_none_or(|b| arena.get(id).score() > arena.get(b).score());
        if better {
            best = Some(id);
        }
    }

    match best {
        Some(best) => {
            if let Some(normalizer) = normalizer {
                normalizer.normalize(arena, tokens, best);
            }
            ScoreOutcome::Scored(best)
        }
        None => ScoreOutcome::Exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use acoustic::PrecomputedScores;
    use asr_core::{AsrError, VecFrameSource};
    use linguist::{ArcWeights, SearchGraph, StaticSearchGraph, StaticState};

    fn tokens(senones: &[u32]) -> (TokenArena<StaticState>, Vec<TokenId>) {
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        for (i, &s) in senones.iter().enumerate() {
            let e = b.add_emitting(&format!("e{i}"), SenoneId(s));
            b.add_arc(init, e, ArcWeights::default()).unwrap();
        }
        let g = b.build(init).unwrap();
        let mut arena = TokenArena::new();
        let ids = g
            .successors(&g.initial_state())
            .into_iter()
            .map(|a| arena.alloc(Token::new(None, a.state, -1.0, 0.0, 0.0, 0)))
            .collect();
        (arena, ids)
    }

    #[test]
    fn test_scores_applied_and_best_is_first_maximum() {
        let (mut arena, ids) = tokens(&[0, 1, 2, 1]);
        let mut scorer = SimpleAcousticScorer::new(PrecomputedScores::new(3));
        let mut source = VecFrameSource::from_frames(vec![vec![-3.0, -0.5, -2.0]]);

        let outcome = calculate_scores(&mut scorer, None, &mut arena, &ids, &mut source);
        assert_eq!(outcome, ScoreOutcome::Scored(ids[1]));
        assert_eq!(arena.get(ids[0]).score(), -4.0);
        assert_eq!(arena.get(ids[3]).score(), -1.5);
        assert!(ids.iter().all(|&id| arena.get(id).is_scored()));

        // Следующим идёт DataEnd.
        let outcome = calculate_scores(&mut scorer, None, &mut arena, &ids, &mut source);
        assert_eq!(outcome, ScoreOutcome::Signal(Signal::DataEnd));
        let outcome = calculate_scores(&mut scorer, None, &mut arena, &ids, &mut source);
        assert_eq!(outcome, ScoreOutcome::Exhausted);
    }

    #[test]
    fn test_normalizer_zeroes_best() {
        let (mut arena, ids) = tokens(&[0, 1]);
        let mut scorer = SimpleAcousticScorer::new(PrecomputedScores::new(2));
        let mut source = VecFrameSource::from_frames(vec![vec![-2.0, -1.0]]);
        let normalizer = MaxScoreNormalizer;
        let outcome = calculate_scores(&mut scorer, Some(&normalizer), &mut arena, &ids, &mut source);
        assert_eq!(outcome, ScoreOutcome::Scored(ids[1]));
        assert_eq!(arena.get(ids[1]).score(), 0.0);
        assert_eq!(arena.get(ids[0]).score(), -1.0);
    }

    #[test]
    fn test_empty_list_and_bad_frame_exhaust() {
        let (mut arena, ids) = tokens(&[0, 5]);
        let mut scorer = SimpleAcousticScorer::new(PrecomputedScores::new(2));
        let mut source = VecFrameSource::from_frames(vec![vec![0.0, 0.0], vec![0.0, 0.0]]);
        assert_eq!(
            calculate_scores(&mut scorer, None, &mut arena, &[], &mut source),
            ScoreOutcome::Exhausted
        );
        // Сенон 5 отсутствует в кадре: ошибка скоринга завершает высказывание.
        assert_eq!(
            calculate_scores(&mut scorer, None, &mut arena, &ids, &mut source),
            ScoreOutcome::Exhausted
        );
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn next_data(&mut self) -> AsrResult<Option<Data>> {
            Err(AsrError::Scoring("повреждённый кадр".to_string()))
        }
    }

    #[test]
    fn test_source_error_exhausts() {
        let (mut arena, ids) = tokens(&[0]);
        let mut scorer = SimpleAcousticScorer::new(PrecomputedScores::new(1));
        assert_eq!(
            calculate_scores(&mut scorer, None, &mut arena, &ids, &mut FailingSource),
            ScoreOutcome::Exhausted
        );
    }
}
