//! Поиск в ширину с передачей токенов.
//!
//! Цикл по кадрам:
//!
//! 1. **Скоринг** — эмитирующие токены активного списка получают
//!    акустическую оценку следующего кадра.
//! 2. **Прунинг** — [`Pruner`] сокращает список.
//! 3. **Рост** — из каждого выжившего токена поиск в глубину по дугам
//!    графа до следующих эмитирующих состояний. Неэмитирующие состояния
//!    раскрываются сразу, эмитирующие попадают в новый активный список.
//!
//! Рекомбинация: в пределах одного шага роста на каждое состояние
//! остаётся один токен с лучшей оценкой входа (правило равенства задаёт
//! [`TieBreak`]).

use std::collections::HashMap;
use std::time::Instant;

use asr_core::log_math::mul;
use asr_core::{AsrError, AsrResult, DecoderConfig, FrameSource, LOG_ZERO, TieBreak};
use linguist::{SearchGraph, SearchState};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::active_list::{ActiveList, ActiveListFactory};
use crate::pruner::Pruner;
use crate::result::{Hypothesis, SearchResult};
use crate::scorer::{AcousticScorer, MaxScoreNormalizer, ScoreOutcome, calculate_scores};
use crate::token::{Token, TokenArena, TokenId};

// ---------------------------------------------------------------------------
// Статистика
// ---------------------------------------------------------------------------

/// Счётчики поиска за высказывание.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStatistics {
    /// Обработано кадров.
    pub frames: usize,
    /// Создано токенов.
    pub tokens_created: usize,
    /// Токенов передано скореру.
    pub tokens_scored: usize,
    /// Отброшено прунингом.
    pub tokens_pruned: usize,
    /// Проиграли рекомбинацию.
    pub viterbi_pruned: usize,
    /// Максимальный размер активного списка.
    pub max_active: usize,
    /// Уплотнений арены.
    pub compactions: usize,
    /// Время скоринга, мс.
    pub score_ms: f64,
    /// Время роста, мс.
    pub grow_ms: f64,
}

// ---------------------------------------------------------------------------
// Менеджер поиска
// ---------------------------------------------------------------------------

/// Менеджер поиска в ширину.
///
/// Жизненный цикл: [`allocate`](Self::allocate) →
/// [`start_recognition`](Self::start_recognition) →
/// [`recognize`](Self::recognize)… →
/// [`stop_recognition`](Self::stop_recognition).
pub struct BreadthFirstSearchManager<G: SearchGraph> {
    graph: G,
    scorer: Box<dyn AcousticScorer>,
    pruner: Box<dyn Pruner<G::State>>,
    factory: ActiveListFactory,
    normalizer: Option<MaxScoreNormalizer>,

    log_relative_word_beam_width: Option<f32>,
    want_entry_pruning: bool,
    grow_skip_interval: usize,
    tie_break: TieBreak,
    gc_interval_frames: usize,

    arena: TokenArena<G::State>,
    active_list: ActiveList,
    result_list: Vec<TokenId>,
    best_tokens: HashMap<G::State, TokenId>,
    threshold: f32,
    word_threshold: f32,
    current_frame: usize,
    stream_end: bool,

    allocated: bool,
    recognizing: bool,
    stats: SearchStatistics,
}

impl<G: SearchGraph> BreadthFirstSearchManager<G> {
    /// Создать менеджер поиска.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Config` при некорректных лучах.
    pub fn new(
        graph: G,
        scorer: Box<dyn AcousticScorer>,
        pruner: Box<dyn Pruner<G::State>>,
        config: &DecoderConfig,
    ) -> AsrResult<Self> {
        config.validate()?;
        let log_math = config.log_math()?;
        let search = &config.search;
        let factory = ActiveListFactory::new(search, &log_math)?;
        let log_relative_word_beam_width = search
            .relative_word_beam_width
            .map(|w| log_math.linear_to_log(w))
            .transpose()?;

        Ok(Self {
            graph,
            scorer,
            pruner,
            factory,
            normalizer: config.scorer.normalize_scores.then_some(MaxScoreNormalizer),
            log_relative_word_beam_width,
            want_entry_pruning: search.want_entry_pruning,
            grow_skip_interval: search.grow_skip_interval,
            tie_break: search.tie_break,
            gc_interval_frames: search.gc_interval_frames,
            arena: TokenArena::new(),
            active_list: factory.new_instance(),
            result_list: Vec::new(),
            best_tokens: HashMap::new(),
            threshold: LOG_ZERO,
            word_threshold: LOG_ZERO,
            current_frame: 0,
            stream_end: false,
            allocated: false,
            recognizing: false,
            stats: SearchStatistics::default(),
        })
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn arena(&self) -> &TokenArena<G::State> {
        &self.arena
    }

    pub fn active_list(&self) -> &ActiveList {
        &self.active_list
    }

    /// Токены конечных состояний последнего шага роста.
    pub fn result_list(&self) -> &[TokenId] {
        &self.result_list
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn statistics(&self) -> &SearchStatistics {
        &self.stats
    }

    pub fn is_recognizing(&self) -> bool {
        self.recognizing
    }

    /// Подготовить скорер (например, запустить пул потоков).
    pub fn allocate(&mut self) -> AsrResult<()> {
        if !self.allocated {
            self.scorer.allocate()?;
            self.allocated = true;
            debug!("Менеджер поиска: скорер {} готов", self.scorer.name());
        }
        Ok(())
    }

    pub fn deallocate(&mut self) {
        if self.allocated {
            self.scorer.deallocate();
            self.allocated = false;
        }
    }

    /// Начать высказывание: начальный токен и первый шаг роста.
    pub fn start_recognition(&mut self) -> AsrResult<()> {
        self.allocate()?;
        self.pruner.start_recognition();
        self.scorer.start_recognition();

        self.arena.clear();
        self.result_list.clear();
        self.stats = SearchStatistics::default();
        self.current_frame = 0;
        self.stream_end = false;

        let mut list = self.factory.new_instance();
        let initial = self
            .arena
            .alloc(Token::initial(self.graph.initial_state(), self.current_frame));
        list.add(&mut self.arena, initial);
        self.active_list = list;
        self.recognizing = true;

        self.grow_branches();
        Ok(())
    }

    /// Обработать до `n_frames` кадров.
    ///
    /// Возвращает снимок результата или `None`, если поток кончился без
    /// сигнала (или скоринг не удался) либо активный список пуст.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Search`, если распознавание не начато.
    pub fn recognize(
        &mut self,
        source: &mut dyn FrameSource,
        n_frames: usize,
    ) -> AsrResult<Option<SearchResult<'_, G::State>>> {
        if !self.recognizing {
            return Err(AsrError::Search(
                "recognize вызван до start_recognition".to_string(),
            ));
        }
        self.stream_end = false;

        let mut done = false;
        let mut processed = 0;
        while processed < n_frames && !done {
            done = self.recognize_frame(source);
            processed += 1;
        }

        if self.active_list.best().is_none() || self.stream_end {
            return Ok(None);
        }
        let fixed = self.undo_last_grow_step();
        Ok(Some(SearchResult::new(
            &self.arena,
            fixed,
            &self.result_list,
            self.current_frame,
            done,
        )))
    }

    /// Завершить высказывание.
    pub fn stop_recognition(&mut self) {
        if !self.recognizing {
            return;
        }
        self.recognizing = false;
        self.scorer.stop_recognition();
        self.pruner.stop_recognition();
        let s = &self.stats;
        info!(
            "Высказывание: {} кадров, токенов создано {}, оценено {}, отсечено {} (+{} рекомбинацией), \
             макс. активных {}, скоринг {:.1} мс, рост {:.1} мс",
            s.frames,
            s.tokens_created,
            s.tokens_scored,
            s.tokens_pruned,
            s.viterbi_pruned,
            s.max_active,
            s.score_ms,
            s.grow_ms
        );
    }

    /// Распознать высказывание целиком и вернуть лучшую гипотезу.
    pub fn decode(&mut self, source: &mut dyn FrameSource) -> AsrResult<Hypothesis> {
        self.start_recognition()?;
        let hypothesis = match self.recognize(source, usize::MAX)? {
            Some(result) => result.hypothesis(),
            None => {
                warn!("Высказывание завершилось без результата");
                Hypothesis::default()
            }
        };
        self.stop_recognition();
        Ok(hypothesis)
    }

    // -----------------------------------------------------------------------
    // Кадр
    // -----------------------------------------------------------------------

    /// Один кадр; `true`, когда высказывание закончилось.
    fn recognize_frame(&mut self, source: &mut dyn FrameSource) -> bool {
        let more = self.score_tokens(source);
        if more {
            self.prune_branches();
            self.current_frame += 1;
            self.stats.frames += 1;
            if self.grow_skip_interval == 0 || self.current_frame % self.grow_skip_interval != 0 {
                self.grow_branches();
            }
        }
        !more
    }

    fn score_tokens(&mut self, source: &mut dyn FrameSource) -> bool {
        let started = Instant::now();
        let outcome = calculate_scores(
            self.scorer.as_mut(),
            self.normalizer.as_ref(),
            &mut self.arena,
            self.active_list.tokens(),
            source,
        );
        self.stats.score_ms += started.elapsed().as_secs_f64() * 1000.0;
        self.stats.tokens_scored += self.active_list.len();

        match outcome {
            ScoreOutcome::Scored(best) => {
                self.active_list.set_best(Some(best));
                true
            }
            ScoreOutcome::Signal(signal) => {
                debug!("Кадр {}: сигнал {signal:?}", self.current_frame);
                false
            }
            ScoreOutcome::Exhausted => {
                self.stream_end = true;
                false
            }
        }
    }

    fn prune_branches(&mut self) {
        let before = self.active_list.len();
        let list = std::mem::replace(&mut self.active_list, self.factory.new_instance());
        self.active_list = self.pruner.prune(list, &mut self.arena);
        self.stats.tokens_pruned += before - self.active_list.len().min(before);
    }

    // -----------------------------------------------------------------------
    // Рост
    // -----------------------------------------------------------------------

    fn grow_branches(&mut self) {
        let started = Instant::now();
        self.best_tokens.clear();
        self.result_list.clear();

        let old = std::mem::replace(&mut self.active_list, self.factory.new_instance());
        self.threshold = old.beam_threshold(&self.arena);
        self.word_threshold = match self.log_relative_word_beam_width {
            Some(width) => mul(old.best_score(&self.arena), width),
            None => LOG_ZERO,
        };

        for &token in old.tokens() {
            self.collect_successor_tokens(token);
        }
        self.best_tokens.clear();

        self.stats.grow_ms += started.elapsed().as_secs_f64() * 1000.0;
        self.stats.max_active = self.stats.max_active.max(self.active_list.len());
        debug!(
            "Кадр {}: активных {}, конечных {}",
            self.current_frame,
            self.active_list.len(),
            self.result_list.len()
        );
        if asr_core::debug::token_trace_enabled() {
            info!(
                "[trace] кадр {}: в арене {} токенов (создано {})",
                self.current_frame,
                self.arena.len(),
                self.arena.created()
            );
        }

        if self.gc_interval_frames > 0
            && self.current_frame > 0
            && self.current_frame % self.gc_interval_frames == 0
        {
            self.compact();
        }
    }

    /// Раскрыть дуги токена.
    fn collect_successor_tokens(&mut self, token: TokenId) {
        let (state, score) = {
            let t = self.arena.get(token);
            if t.is_final() {
                self.result_list.push(token);
            }
            (t.state().clone(), t.score())
        };
        if score < self.threshold {
            return;
        }
        if state.is_word() && score < self.word_threshold {
            return;
        }

        for arc in self.graph.successors(&state) {
            let entry_score = mul(score, arc.probability());
            if self.want_entry_pruning {
                if entry_score < self.threshold {
                    continue;
                }
                if arc.state.is_word() && entry_score < self.word_threshold {
                    continue;
                }
            }

            let existing = self.best_tokens.get(&arc.state).copied();
            let wins = existing.is_none_or(|best| {
                self.tie_break
                    .replaces(self.arena.get(best).score(), entry_score)
            });
            if !wins {
                self.stats.viterbi_pruned += 1;
                continue;
            }

            let emitting = arc.state.is_emitting();
            let new = self.arena.alloc(Token::new(
                Some(token),
                arc.state.clone(),
                entry_score,
                arc.insertion_probability,
                arc.language_probability,
                self.current_frame,
            ));
            self.stats.tokens_created += 1;
            self.best_tokens.insert(arc.state, new);

            if !emitting {
                // Повторный заход в состояние без эмитирующих между ними
                // не раскрывается: иначе циклы из пустых переходов
                // рекурсируют бесконечно.
                if !self.is_visited(new) {
                    self.collect_successor_tokens(new);
                }
            } else if existing.is_some() {
                self.active_list.replace(&mut self.arena, existing, new);
                self.stats.viterbi_pruned += 1;
            } else {
                self.active_list.add(&mut self.arena, new);
            }
        }
    }

    /// Встречалось ли состояние токена в его неэмитирующей цепочке предков.
    fn is_visited(&self, id: TokenId) -> bool {
        let token = self.arena.get(id);
        let mut cursor = token.predecessor();
        while let Some(prev) = cursor {
            let prev = self.arena.get(prev);
            if prev.is_emitting() {
                return false;
            }
            if prev.state() == token.state() {
                return true;
            }
            cursor = prev.predecessor();
        }
        false
    }

    /// Откатить спекулятивный рост последнего кадра.
    ///
    /// Для каждого активного токена идём назад до последнего оценённого
    /// эмитирующего или настоящего конечного токена.
    fn undo_last_grow_step(&self) -> Vec<TokenId> {
        let mut fixed = Vec::with_capacity(self.active_list.len());
        let mut seen = std::collections::HashSet::new();
        for &id in self.active_list.tokens() {
            let mut cursor = self.arena.get(id).predecessor().unwrap_or(id);
            loop {
                let current = self.arena.get(cursor);
                let Some(prev) = current.predecessor() else {
                    break;
                };
                let prev_final = self.arena.get(prev).is_final();
                let hides_final = current.is_final() && !prev_final;
                let unscored = current.is_emitting() && !current.is_scored();
                let transit = !current.is_final() && !current.is_emitting();
                if !(hides_final || unscored || transit) {
                    break;
                }
                cursor = prev;
            }
            if seen.insert(cursor) {
                fixed.push(cursor);
            }
        }
        fixed
    }

    /// Освободить токены, недостижимые из активного списка и результатов.
    fn compact(&mut self) {
        let before = self.arena.len();
        let roots: Vec<TokenId> = self
            .active_list
            .tokens()
            .iter()
            .chain(self.result_list.iter())
            .copied()
            .collect();
        let remap = self.arena.compact(roots);
        self.active_list.remap(&remap);
        self.result_list.retain_mut(|id| match remap.get(*id) {
            Some(new) => {
                *id = new;
                true
            }
            None => false,
        });
        self.stats.compactions += 1;
        debug!(
            "Кадр {}: арена уплотнена {} → {}",
            self.current_frame,
            before,
            self.arena.len()
        );
    }
}

impl<G: SearchGraph> Drop for BreadthFirstSearchManager<G> {
    fn drop(&mut self) {
        self.deallocate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pruner::SimplePruner;
    use crate::scorer::SimpleAcousticScorer;
    use acoustic::{PrecomputedScores, SenoneId};
    use asr_core::{LogMath, SearchConfig, VecFrameSource};
    use linguist::{ArcWeights, StaticSearchGraph, StaticState};

    fn config(search: SearchConfig) -> DecoderConfig {
        DecoderConfig {
            log_base: std::f32::consts::E,
            use_add_table: false,
            search,
            ..DecoderConfig::small_grammar()
        }
    }

    fn manager(
        graph: StaticSearchGraph,
        search: SearchConfig,
    ) -> BreadthFirstSearchManager<StaticSearchGraph> {
        BreadthFirstSearchManager::new(
            graph,
            Box::new(SimpleAcousticScorer::new(PrecomputedScores::new(2))),
            Box::new(SimplePruner),
            &config(search),
        )
        .unwrap()
    }

    /// init → p_i (вход `entries[i]`) → e.
    fn converging(entries: &[f32]) -> StaticSearchGraph {
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        let e = b.add_emitting("e", SenoneId(0));
        for (i, &w) in entries.iter().enumerate() {
            let p = b.add_non_emitting(&format!("p{i}"));
            b.add_arc(init, p, ArcWeights::acoustic(w)).unwrap();
            b.add_arc(p, e, ArcWeights::default()).unwrap();
        }
        b.build(init).unwrap()
    }

    fn survivor(m: &BreadthFirstSearchManager<StaticSearchGraph>) -> &Token<StaticState> {
        assert_eq!(m.active_list().len(), 1);
        m.arena().get(m.active_list().tokens()[0])
    }

    fn predecessor_name(m: &BreadthFirstSearchManager<StaticSearchGraph>) -> String {
        let pred = survivor(m).predecessor().unwrap();
        m.arena().get(pred).state().name().to_string()
    }

    #[test]
    fn test_recombination_keeps_best_entry() {
        let mut m = manager(converging(&[-5.0, -3.0, -7.0]), SearchConfig::default());
        m.start_recognition().unwrap();
        assert_eq!(survivor(&m).score(), -3.0);
        assert_eq!(predecessor_name(&m), "p1");
        assert_eq!(m.statistics().viterbi_pruned, 2);
    }

    #[test]
    fn test_tie_break_prefer_newer() {
        let mut m = manager(converging(&[-3.0, -3.0]), SearchConfig::default());
        m.start_recognition().unwrap();
        assert_eq!(predecessor_name(&m), "p1");
    }

    #[test]
    fn test_tie_break_prefer_existing() {
        let search = SearchConfig {
            tie_break: TieBreak::PreferExisting,
            ..SearchConfig::default()
        };
        let mut m = manager(converging(&[-3.0, -3.0]), search);
        m.start_recognition().unwrap();
        assert_eq!(predecessor_name(&m), "p0");
    }

    #[test]
    fn test_recognize_before_start_is_error() {
        let mut m = manager(converging(&[0.0]), SearchConfig::default());
        let mut source = VecFrameSource::from_frames(vec![vec![0.0, 0.0]]);
        assert!(matches!(m.recognize(&mut source, 1), Err(AsrError::Search(_))));
    }

    /// init → {a, b} (эмитирующие); a — слово с порогом слов.
    #[test]
    fn test_entry_pruning_uses_threshold() {
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        let e = b.add_emitting("e", SenoneId(0));
        let good = b.add_emitting("good", SenoneId(0));
        let bad = b.add_emitting("bad", SenoneId(1));
        b.add_arc(init, e, ArcWeights::default()).unwrap();
        b.add_arc(e, good, ArcWeights::acoustic(-0.1)).unwrap();
        b.add_arc(e, bad, ArcWeights::acoustic(-50.0)).unwrap();
        b.add_arc(good, good, ArcWeights::default()).unwrap();
        b.add_arc(bad, bad, ArcWeights::default()).unwrap();
        let g = b.build(init).unwrap();

        let relative = (-10.0f64).exp();
        let with_entry = SearchConfig {
            relative_beam_width: Some(relative),
            want_entry_pruning: true,
            ..SearchConfig::default()
        };
        let mut m = manager(g.clone(), with_entry);
        m.start_recognition().unwrap();
        let mut source = VecFrameSource::from_frames(vec![vec![0.0, 0.0]]);
        m.recognize(&mut source, 1).unwrap();
        // Вход в `bad` ниже порога лучшего (0 - 10).
        assert_eq!(m.active_list().len(), 1);

        let without_entry = SearchConfig {
            relative_beam_width: Some(relative),
            ..SearchConfig::default()
        };
        let mut m = manager(g, without_entry);
        m.start_recognition().unwrap();
        let mut source = VecFrameSource::from_frames(vec![vec![0.0, 0.0]]);
        m.recognize(&mut source, 1).unwrap();
        assert_eq!(m.active_list().len(), 2);
    }

    #[test]
    fn test_word_beam_is_independent() {
        let log_math = LogMath::natural();
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        let e = b.add_emitting("e", SenoneId(0));
        b.add_arc(init, e, ArcWeights::default()).unwrap();
        b.add_arc(e, e, ArcWeights::default()).unwrap();
        let g = b.build(init).unwrap();

        let search = SearchConfig {
            relative_word_beam_width: Some(1e-3),
            ..SearchConfig::default()
        };
        let mut m = manager(g, search);
        m.start_recognition().unwrap();
        let mut source = VecFrameSource::from_frames(vec![vec![-2.0, 0.0]]);
        m.recognize(&mut source, 1).unwrap();
        // Общий луч выключен, порог слов считается от лучшего токена.
        assert_eq!(m.threshold, LOG_ZERO);
        let expected = -2.0 + log_math.linear_to_log(1e-3).unwrap();
        assert!((m.word_threshold - expected).abs() < 1e-4);
    }

    #[test]
    fn test_grow_skip_interval_rescores_same_tokens() {
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        let e = b.add_emitting("e", SenoneId(0));
        b.add_arc(init, e, ArcWeights::default()).unwrap();
        b.add_arc(e, e, ArcWeights::acoustic(-1.0)).unwrap();
        let g = b.build(init).unwrap();

        let search = SearchConfig {
            grow_skip_interval: 2,
            ..SearchConfig::default()
        };
        let mut m = manager(g, search);
        m.start_recognition().unwrap();
        let mut source = VecFrameSource::from_frames(vec![vec![-1.0, 0.0]; 3]);

        // Кадр 1: рост, новый токен петли.
        m.recognize(&mut source, 1).unwrap();
        let grown = m.active_list().tokens().to_vec();
        let created = m.arena().created();
        assert_eq!(grown.len(), 1);
        assert_eq!(m.arena().get(grown[0]).frame(), 1);
        assert_eq!(m.arena().get(grown[0]).score(), -2.0);

        // Кадр 2: рост пропущен, тот же токен оценён ещё раз.
        m.recognize(&mut source, 1).unwrap();
        assert_eq!(m.current_frame(), 2);
        assert_eq!(m.active_list().tokens(), grown.as_slice());
        assert_eq!(m.arena().created(), created);
        assert_eq!(m.arena().get(grown[0]).score(), -3.0);

        // Кадр 3: рост возобновляется от повторно оценённого токена.
        m.recognize(&mut source, 1).unwrap();
        let regrown = m.active_list().tokens().to_vec();
        assert_eq!(regrown.len(), 1);
        assert_ne!(regrown, grown);
        let token = m.arena().get(regrown[0]);
        assert_eq!(token.frame(), 3);
        assert_eq!(token.predecessor(), Some(grown[0]));
        assert_eq!(token.score(), -5.0);
    }

    #[test]
    fn test_compaction_keeps_active_chains() {
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        let e = b.add_emitting("e", SenoneId(0));
        let f = b.add_emitting("f", SenoneId(1));
        b.add_arc(init, e, ArcWeights::default()).unwrap();
        b.add_arc(e, e, ArcWeights::acoustic(-0.1)).unwrap();
        b.add_arc(e, f, ArcWeights::acoustic(-0.2)).unwrap();
        // Петля f дешевле входа из e: вход из e каждый кадр вытесняется.
        b.add_arc(f, f, ArcWeights::default()).unwrap();
        let g = b.build(init).unwrap();

        let search = SearchConfig {
            gc_interval_frames: 2,
            ..SearchConfig::default()
        };
        let mut m = manager(g, search);
        m.start_recognition().unwrap();
        let mut source = VecFrameSource::from_frames(vec![vec![-1.0, -1.0]; 6]);
        let result = m.recognize(&mut source, usize::MAX).unwrap().unwrap();
        assert!(result.is_final());
        let best = result.best_token().unwrap();
        // Цепочка от лучшего токена доходит до начального.
        assert_eq!(result.arena().path(best).last().unwrap().predecessor(), None);
        assert!(m.statistics().compactions >= 3);
        assert!(m.arena().len() < m.arena().created());
    }
}
