//! # decoder
//!
//! Поиск в ширину с передачей токенов для декодера RustASR:
//!
//! - Токены в арене высказывания ([`TokenArena`], [`Token`])
//! - Активный список с частичным упорядочиванием ([`ActiveList`])
//! - Прунинг ([`Pruner`], [`SimplePruner`])
//! - Акустические скореры: последовательный, многопоточный, батчевый
//! - Менеджер поиска ([`BreadthFirstSearchManager`]) и результаты ([`SearchResult`])

pub mod active_list;
pub mod pruner;
pub mod result;
pub mod scorer;
pub mod search_manager;
pub mod token;

pub use active_list::{ActiveList, ActiveListFactory};
pub use pruner::{Pruner, SimplePruner};
pub use result::{Hypothesis, SearchResult, WordSegment};
pub use scorer::{
    AcousticScorer, BatchAcousticScorer, MaxScoreNormalizer, ScoreOutcome, SimpleAcousticScorer,
    ThreadedAcousticScorer, calculate_scores,
};
pub use search_manager::{BreadthFirstSearchManager, SearchStatistics};
pub use token::{Remap, Token, TokenArena, TokenId};
