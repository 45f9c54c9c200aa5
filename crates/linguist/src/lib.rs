//! # linguist
//!
//! Пространство поиска декодера RustASR:
//!
//! - Словарь произношений ([`Dictionary`]) и униграммная LM ([`UnigramModel`])
//! - Абстракция графа поиска ([`SearchGraph`], [`SearchState`])
//! - Компилятор лексического дерева ([`LexicalTree`])
//! - Граф поиска на дереве ([`LexTreeLinguist`]) и явный граф ([`StaticSearchGraph`])

pub mod dictionary;
pub mod language_model;
pub mod lextree;
pub mod lextree_graph;
pub mod search_graph;
pub mod static_graph;

pub use dictionary::{
    Dictionary, Pronunciation, PronunciationId, SENTENCE_END, SENTENCE_START, SILENCE_WORD, Word,
};
pub use language_model::{LanguageModel, UnigramModel};
pub use lextree::{
    EndHmm, InitialWordNode, LexNode, LexicalTree, MissingHmmReport, NodeId, Slots, SuccessorKey,
    TreeStats, UnitKind,
};
pub use lextree_graph::{LexTreeLinguist, LexTreeState, UnitRef};
pub use search_graph::{SearchGraph, SearchState, SearchStateArc, StateKind};
pub use static_graph::{ArcWeights, StateIndex, StaticGraphBuilder, StaticSearchGraph, StaticState};
