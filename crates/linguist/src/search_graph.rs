//! Абстракция графа поиска.
//!
//! Граф разворачивается лениво: менеджер поиска знает только начальное
//! состояние и спрашивает у графа исходящие дуги текущего состояния.
//! Лексическое дерево ([`crate::lextree_graph::LexTreeLinguist`]) и явный
//! граф грамматики ([`crate::static_graph::StaticSearchGraph`]) — две
//! реализации.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use acoustic::{SenoneId, UnitId};
use asr_core::LOG_ONE;
use asr_core::log_math::mul;

use crate::dictionary::{Pronunciation, Word};

/// Вариант состояния графа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Начальное состояние (контекст `<s>`).
    Initial,
    /// Вход в юнит (неэмитирующее).
    Unit,
    /// Эмитирующее состояние HMM.
    HmmState,
    /// Конец слова (неэмитирующее).
    Word,
    /// Прочие неэмитирующие состояния грамматики.
    NonEmitting,
}

/// Состояние графа поиска.
///
/// Равенство и хеш определяют рекомбинацию: два токена в равных
/// состояниях одного кадра сливаются.
pub trait SearchState: Clone + Eq + Hash + Debug + Send + Sync {
    fn kind(&self) -> StateKind;

    /// Конечное состояние высказывания.
    fn is_final(&self) -> bool;

    /// Сенон эмитирующего состояния.
    fn senone(&self) -> Option<SenoneId>;

    /// Произношение для состояний-слов.
    fn pronunciation(&self) -> Option<&Arc<Pronunciation>>;

    /// Юнит для состояний входа в юнит.
    fn unit(&self) -> Option<UnitId> {
        None
    }

    fn is_emitting(&self) -> bool {
        self.kind() == StateKind::HmmState
    }

    fn is_word(&self) -> bool {
        self.pronunciation().is_some()
    }

    fn word(&self) -> Option<&Word> {
        self.pronunciation().map(|p| p.word())
    }
}

/// Дуга графа: целевое состояние и три компоненты лог-вероятности.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStateArc<S> {
    pub state: S,
    /// Переход HMM (акустическая часть дуги).
    pub acoustic_probability: f32,
    pub language_probability: f32,
    pub insertion_probability: f32,
}

impl<S> SearchStateArc<S> {
    /// Дуга с нулевыми (в лог-области) компонентами.
    pub fn new(state: S) -> Self {
        Self {
            state,
            acoustic_probability: LOG_ONE,
            language_probability: LOG_ONE,
            insertion_probability: LOG_ONE,
        }
    }

    pub fn with_acoustic(mut self, log_prob: f32) -> Self {
        self.acoustic_probability = log_prob;
        self
    }

    pub fn with_language(mut self, log_prob: f32) -> Self {
        self.language_probability = log_prob;
        self
    }

    pub fn with_insertion(mut self, log_prob: f32) -> Self {
        self.insertion_probability = log_prob;
        self
    }

    /// Полная лог-вероятность дуги.
    pub fn probability(&self) -> f32 {
        mul(
            mul(self.acoustic_probability, self.language_probability),
            self.insertion_probability,
        )
    }
}

/// Лениво разворачиваемый граф поиска.
pub trait SearchGraph: Send + Sync {
    type State: SearchState;

    fn initial_state(&self) -> Self::State;

    /// Исходящие дуги в детерминированном порядке.
    fn successors(&self, state: &Self::State) -> Vec<SearchStateArc<Self::State>>;
}

impl<G: SearchGraph + ?Sized> SearchGraph for Arc<G> {
    type State = G::State;

    fn initial_state(&self) -> Self::State {
        (**self).initial_state()
    }

    fn successors(&self, state: &Self::State) -> Vec<SearchStateArc<Self::State>> {
        (**self).successors(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asr_core::LOG_ZERO;

    #[test]
    fn test_arc_probability_sums_components() {
        let arc = SearchStateArc::new(())
            .with_acoustic(-1.0)
            .with_language(-2.0)
            .with_insertion(-0.5);
        assert_eq!(arc.probability(), -3.5);
        assert_eq!(SearchStateArc::new(()).probability(), LOG_ONE);
        assert_eq!(SearchStateArc::new(()).with_language(LOG_ZERO).probability(), LOG_ZERO);
    }
}
