//! Граф поиска поверх лексического дерева.
//!
//! Состояния разворачиваются из узлов [`LexicalTree`] лениво:
//!
//! - `Initial` (`<s>`) и `Word` ведут в начальные юниты следующих слов
//!   с учётом левого контекста (последний юнит слова) и правых
//!   контекстов выхода;
//! - `Unit` — неэмитирующий вход в HMM, ведёт в её состояние 0;
//! - `Hmm` — эмитирующее состояние; переход в выход HMM продолжается
//!   наследниками узла дерева.
//!
//! Языковая вероятность «размазана» по дереву: дуга в узел несёт разность
//! оптимистичных вероятностей узла и его родителя, так что сумма вдоль
//! пути равна униграмме слова.

use std::sync::Arc;

use acoustic::{Hmm, HmmPosition, SenoneId, UnitId};
use asr_core::{AsrResult, LOG_ONE, LOG_ZERO, LexTreeConfig, LogMath};

use crate::dictionary::Pronunciation;
use crate::lextree::{LexNode, LexicalTree, NodeId, UnitKind};
use crate::search_graph::{SearchGraph, SearchState, SearchStateArc, StateKind};

/// Ссылка на HMM юнита: узел дерева или HMM конечного узла по индексу.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitRef {
    Node(NodeId),
    End { node: NodeId, index: u32 },
}

impl UnitRef {
    /// Узел дерева, наследники которого продолжают юнит.
    pub fn node(self) -> NodeId {
        match self {
            UnitRef::Node(node) | UnitRef::End { node, .. } => node,
        }
    }
}

/// Состояние графа лексического дерева.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexTreeState {
    Initial {
        pronunciation: Arc<Pronunciation>,
    },
    Unit {
        unit: UnitRef,
        unit_id: UnitId,
    },
    Hmm {
        unit: UnitRef,
        state: u32,
        senone: SenoneId,
    },
    Word {
        node: NodeId,
        /// Юнит, из которого вышли в слово; определяет правые контексты.
        exit: UnitRef,
        pronunciation: Arc<Pronunciation>,
        is_final: bool,
    },
}

impl SearchState for LexTreeState {
    fn kind(&self) -> StateKind {
        match self {
            LexTreeState::Initial { .. } => StateKind::Initial,
            LexTreeState::Unit { .. } => StateKind::Unit,
            LexTreeState::Hmm { .. } => StateKind::HmmState,
            LexTreeState::Word { .. } => StateKind::Word,
        }
    }

    fn is_final(&self) -> bool {
        matches!(self, LexTreeState::Word { is_final: true, .. })
    }

    fn senone(&self) -> Option<SenoneId> {
        match self {
            LexTreeState::Hmm { senone, .. } => Some(*senone),
            _ => None,
        }
    }

    fn pronunciation(&self) -> Option<&Arc<Pronunciation>> {
        match self {
            LexTreeState::Initial { pronunciation } | LexTreeState::Word { pronunciation, .. } => {
                Some(pronunciation)
            }
            _ => None,
        }
    }

    fn unit(&self) -> Option<UnitId> {
        match self {
            LexTreeState::Unit { unit_id, .. } => Some(*unit_id),
            _ => None,
        }
    }
}

/// Лингвист на лексическом дереве.
#[derive(Debug, Clone)]
pub struct LexTreeLinguist {
    tree: Arc<LexicalTree>,
    word_insertion: f32,
    silence_insertion: f32,
    filler_insertion: f32,
}

impl LexTreeLinguist {
    /// Перевести вероятности вставки в лог-область декодера.
    pub fn new(tree: Arc<LexicalTree>, config: &LexTreeConfig, log_math: &LogMath) -> AsrResult<Self> {
        config.validate()?;
        Ok(Self {
            tree,
            word_insertion: log_math.linear_to_log(config.word_insertion_probability)?,
            silence_insertion: log_math.linear_to_log(config.silence_insertion_probability)?,
            filler_insertion: log_math.linear_to_log(config.filler_insertion_probability)?,
        })
    }

    pub fn tree(&self) -> &Arc<LexicalTree> {
        &self.tree
    }

    fn insertion(&self, kind: UnitKind) -> f32 {
        match kind {
            UnitKind::Simple => LOG_ONE,
            UnitKind::WordBeginning => self.word_insertion,
            UnitKind::Silence => self.silence_insertion,
            UnitKind::Filler => self.filler_insertion,
        }
    }

    /// HMM, на которую указывает ссылка.
    pub fn hmm(&self, unit: UnitRef) -> Option<Arc<Hmm>> {
        match unit {
            UnitRef::Node(node) => match self.tree.node(node)? {
                LexNode::Unit { hmm, .. } => Some(hmm.clone()),
                _ => None,
            },
            UnitRef::End { node, index } => match self.tree.node(node)? {
                LexNode::End { base, left_context } => self
                    .tree
                    .end_hmms(*base, *left_context)
                    .get(index as usize)
                    .map(|e| e.hmm.clone()),
                _ => None,
            },
        }
    }

    /// Правые контексты, допустимые после выхода из юнита.
    fn right_contexts(&self, unit: UnitRef) -> Vec<UnitId> {
        match unit {
            UnitRef::Node(node) => self.tree.right_contexts(node).collect(),
            UnitRef::End { node, index } => match self.tree.node(node) {
                Some(LexNode::End { base, left_context }) => self
                    .tree
                    .end_hmms(*base, *left_context)
                    .get(index as usize)
                    .map(|e| e.right_contexts.to_vec())
                    .unwrap_or_default(),
                _ => Vec::new(),
            },
        }
    }

    /// Дуги в начала слов после слова с данным произношением.
    fn entry_arcs(
        &self,
        pronunciation: &Pronunciation,
        rights: &[UnitId],
        arcs: &mut Vec<SearchStateArc<LexTreeState>>,
    ) {
        let Some(&left) = pronunciation.units().last() else { return };
        for &right in rights {
            for child in self.tree.entry_successors(left, right) {
                self.node_arcs(child, LOG_ONE, LOG_ONE, None, arcs);
            }
        }
    }

    /// Дуги в узел дерева `child` из родителя с вероятностью `parent_probability`.
    ///
    /// `exit` — юнит, из которого выходят в слово (для узлов-слов).
    fn node_arcs(
        &self,
        child: NodeId,
        parent_probability: f32,
        acoustic: f32,
        exit: Option<UnitRef>,
        arcs: &mut Vec<SearchStateArc<LexTreeState>>,
    ) {
        let language = smear(self.tree.probability(child), parent_probability);
        match self.tree.node(child) {
            Some(LexNode::Unit { hmm, kind, .. }) => arcs.push(
                SearchStateArc::new(LexTreeState::Unit {
                    unit: UnitRef::Node(child),
                    unit_id: hmm.unit,
                })
                .with_acoustic(acoustic)
                .with_language(language)
                .with_insertion(self.insertion(*kind)),
            ),
            Some(LexNode::End { base, left_context }) => {
                let insertion = self.insertion(self.tree.unit_kind(*base, HmmPosition::End));
                let end_hmms = self.tree.end_hmms(*base, *left_context);
                for (index, end) in end_hmms.iter().enumerate() {
                    arcs.push(
                        SearchStateArc::new(LexTreeState::Unit {
                            unit: UnitRef::End {
                                node: child,
                                index: index as u32,
                            },
                            unit_id: end.hmm.unit,
                        })
                        .with_acoustic(acoustic)
                        .with_language(language)
                        .with_insertion(insertion),
                    );
                }
            }
            Some(LexNode::Word {
                pronunciation,
                is_final,
            }) => {
                if let Some(exit) = exit {
                    arcs.push(
                        SearchStateArc::new(LexTreeState::Word {
                            node: child,
                            exit,
                            pronunciation: pronunciation.clone(),
                            is_final: *is_final,
                        })
                        .with_acoustic(acoustic)
                        .with_language(language),
                    );
                }
            }
            Some(LexNode::Internal) | None => {}
        }
    }

    fn hmm_arcs(
        &self,
        unit: UnitRef,
        state: usize,
        arcs: &mut Vec<SearchStateArc<LexTreeState>>,
    ) {
        let Some(hmm) = self.hmm(unit) else { return };
        for (to, probability) in hmm.arcs_from(state) {
            if hmm.is_exit(to) {
                let owner = unit.node();
                let parent_probability = self.tree.probability(owner);
                for child in self.tree.successors(owner) {
                    self.node_arcs(child, parent_probability, probability, Some(unit), arcs);
                }
            } else if let Some(senone) = hmm.senone(to) {
                arcs.push(
                    SearchStateArc::new(LexTreeState::Hmm {
                        unit,
                        state: to as u32,
                        senone,
                    })
                    .with_acoustic(probability),
                );
            }
        }
    }
}

impl SearchGraph for LexTreeLinguist {
    type State = LexTreeState;

    fn initial_state(&self) -> LexTreeState {
        LexTreeState::Initial {
            pronunciation: self.tree.initial().pronunciation.clone(),
        }
    }

    fn successors(&self, state: &LexTreeState) -> Vec<SearchStateArc<LexTreeState>> {
        let mut arcs = Vec::new();
        match state {
            LexTreeState::Initial { pronunciation } => {
                let rights: Vec<UnitId> =
                    self.tree.right_contexts(self.tree.initial().parent).collect();
                self.entry_arcs(pronunciation, &rights, &mut arcs);
            }
            LexTreeState::Word { is_final: true, .. } => {}
            LexTreeState::Word {
                exit, pronunciation, ..
            } => {
                let rights = self.right_contexts(*exit);
                self.entry_arcs(pronunciation, &rights, &mut arcs);
            }
            LexTreeState::Unit { unit, .. } => {
                if let Some(senone) = self.hmm(*unit).and_then(|h| h.senone(0)) {
                    arcs.push(SearchStateArc::new(LexTreeState::Hmm {
                        unit: *unit,
                        state: 0,
                        senone,
                    }));
                }
            }
            LexTreeState::Hmm { unit, state, .. } => {
                self.hmm_arcs(*unit, *state as usize, &mut arcs);
            }
        }
        arcs
    }
}

/// Разность оптимистичных вероятностей потомка и родителя.
fn smear(child: f32, parent: f32) -> f32 {
    if child <= LOG_ZERO || parent <= LOG_ZERO {
        return child;
    }
    (child - parent).min(LOG_ONE)
}
