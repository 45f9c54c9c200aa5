//! Явный граф поиска.
//!
//! Заменяет скомпилированную грамматику: состояния и дуги задаются
//! сборщиком заранее. Используется для небольших грамматик и тестов.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use acoustic::SenoneId;
use asr_core::{AsrError, AsrResult, LOG_ONE};

use crate::dictionary::Pronunciation;
use crate::search_graph::{SearchGraph, SearchState, SearchStateArc, StateKind};

/// Индекс состояния в сборщике.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateIndex(pub u32);

/// Веса дуги (лог-область).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcWeights {
    pub acoustic: f32,
    pub language: f32,
    pub insertion: f32,
}

impl Default for ArcWeights {
    fn default() -> Self {
        Self {
            acoustic: LOG_ONE,
            language: LOG_ONE,
            insertion: LOG_ONE,
        }
    }
}

impl ArcWeights {
    /// Только переходная (акустическая) вероятность.
    pub fn acoustic(log_prob: f32) -> Self {
        Self {
            acoustic: log_prob,
            ..Self::default()
        }
    }

    /// Языковая вероятность и вероятность вставки.
    pub fn word(language: f32, insertion: f32) -> Self {
        Self {
            language,
            insertion,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct StateInfo {
    name: String,
    kind: StateKind,
    senone: Option<SenoneId>,
    pronunciation: Option<Arc<Pronunciation>>,
    is_final: bool,
}

/// Состояние явного графа. Равенство и хеш по индексу.
#[derive(Clone)]
pub struct StaticState {
    index: StateIndex,
    info: Arc<StateInfo>,
}

impl StaticState {
    pub fn index(&self) -> StateIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

impl fmt::Debug for StaticState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.info.name, self.index.0)
    }
}

impl PartialEq for StaticState {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for StaticState {}

impl Hash for StaticState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl SearchState for StaticState {
    fn kind(&self) -> StateKind {
        self.info.kind
    }

    fn is_final(&self) -> bool {
        self.info.is_final
    }

    fn senone(&self) -> Option<SenoneId> {
        self.info.senone
    }

    fn pronunciation(&self) -> Option<&Arc<Pronunciation>> {
        self.info.pronunciation.as_ref()
    }
}

/// Сборщик [`StaticSearchGraph`].
#[derive(Debug, Default)]
pub struct StaticGraphBuilder {
    states: Vec<StateInfo>,
    arcs: Vec<Vec<(StateIndex, ArcWeights)>>,
}

impl StaticGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, info: StateInfo) -> StateIndex {
        let index = StateIndex(self.states.len() as u32);
        self.states.push(info);
        self.arcs.push(Vec::new());
        index
    }

    pub fn add_initial(&mut self, name: &str) -> StateIndex {
        self.push(StateInfo {
            name: name.to_string(),
            kind: StateKind::Initial,
            senone: None,
            pronunciation: None,
            is_final: false,
        })
    }

    pub fn add_non_emitting(&mut self, name: &str) -> StateIndex {
        self.push(StateInfo {
            name: name.to_string(),
            kind: StateKind::NonEmitting,
            senone: None,
            pronunciation: None,
            is_final: false,
        })
    }

    /// Неэмитирующее состояние слова.
    pub fn add_word(&mut self, pronunciation: Arc<Pronunciation>) -> StateIndex {
        self.push(StateInfo {
            name: pronunciation.word().spelling().to_string(),
            kind: StateKind::Word,
            senone: None,
            pronunciation: Some(pronunciation),
            is_final: false,
        })
    }

    pub fn add_emitting(&mut self, name: &str, senone: SenoneId) -> StateIndex {
        self.push(StateInfo {
            name: name.to_string(),
            kind: StateKind::HmmState,
            senone: Some(senone),
            pronunciation: None,
            is_final: false,
        })
    }

    /// Пометить состояние конечным.
    pub fn mark_final(&mut self, state: StateIndex) -> AsrResult<()> {
        let info = self
            .states
            .get_mut(state.0 as usize)
            .ok_or_else(|| AsrError::Model(format!("нет состояния {}", state.0)))?;
        if info.kind == StateKind::HmmState {
            return Err(AsrError::Model(format!(
                "эмитирующее состояние {} не может быть конечным",
                info.name
            )));
        }
        info.is_final = true;
        Ok(())
    }

    pub fn add_arc(&mut self, from: StateIndex, to: StateIndex, weights: ArcWeights) -> AsrResult<()> {
        if to.0 as usize >= self.states.len() {
            return Err(AsrError::Model(format!("дуга в несуществующее состояние {}", to.0)));
        }
        let arcs = self
            .arcs
            .get_mut(from.0 as usize)
            .ok_or_else(|| AsrError::Model(format!("дуга из несуществующего состояния {}", from.0)))?;
        arcs.push((to, weights));
        Ok(())
    }

    /// Собрать граф с начальным состоянием `initial`.
    pub fn build(self, initial: StateIndex) -> AsrResult<StaticSearchGraph> {
        if initial.0 as usize >= self.states.len() {
            return Err(AsrError::Model(format!("нет начального состояния {}", initial.0)));
        }
        let states: Vec<StaticState> = self
            .states
            .into_iter()
            .enumerate()
            .map(|(i, info)| StaticState {
                index: StateIndex(i as u32),
                info: Arc::new(info),
            })
            .collect();
        Ok(StaticSearchGraph {
            initial,
            states,
            arcs: self.arcs,
        })
    }
}

/// Граф с заранее заданными состояниями и дугами.
#[derive(Debug, Clone)]
pub struct StaticSearchGraph {
    initial: StateIndex,
    states: Vec<StaticState>,
    arcs: Vec<Vec<(StateIndex, ArcWeights)>>,
}

impl StaticSearchGraph {
    pub fn builder() -> StaticGraphBuilder {
        StaticGraphBuilder::new()
    }

    pub fn state(&self, index: StateIndex) -> Option<&StaticState> {
        self.states.get(index.0 as usize)
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }
}

impl SearchGraph for StaticSearchGraph {
    type State = StaticState;

    fn initial_state(&self) -> StaticState {
        self.states[self.initial.0 as usize].clone()
    }

    fn successors(&self, state: &StaticState) -> Vec<SearchStateArc<StaticState>> {
        self.arcs
            .get(state.index.0 as usize)
            .into_iter()
            .flatten()
            .filter_map(|(to, w)| {
                let target = self.states.get(to.0 as usize)?.clone();
                Some(SearchStateArc {
                    state: target,
                    acoustic_probability: w.acoustic,
                    language_probability: w.language,
                    insertion_probability: w.insertion,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_arcs_and_states() {
        let mut b = StaticSearchGraph::builder();
        let init = b.add_initial("init");
        let e = b.add_emitting("e", SenoneId(3));
        let end = b.add_non_emitting("end");
        b.add_arc(init, e, ArcWeights::acoustic(-1.0)).unwrap();
        b.add_arc(e, e, ArcWeights::acoustic(-0.5)).unwrap();
        b.add_arc(e, end, ArcWeights::word(-2.0, -0.1)).unwrap();
        b.mark_final(end).unwrap();
        assert!(b.mark_final(e).is_err());
        assert!(b.add_arc(e, StateIndex(99), ArcWeights::default()).is_err());
        let g = b.build(init).unwrap();

        let start = g.initial_state();
        assert_eq!(start.kind(), StateKind::Initial);
        let succ = g.successors(&start);
        assert_eq!(succ.len(), 1);
        assert_eq!(succ[0].state.senone(), Some(SenoneId(3)));
        assert!(succ[0].state.is_emitting());

        let from_e = g.successors(&succ[0].state);
        assert_eq!(from_e.len(), 2);
        assert!(from_e[1].state.is_final());
        assert!((from_e[1].probability() + 2.1).abs() < 1e-6);
    }
}
