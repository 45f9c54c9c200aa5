//! Прунинг активного списка.

use linguist::SearchState;

use crate::active_list::ActiveList;
use crate::token::TokenArena;

/// Сокращает активный список после скоринга.
pub trait Pruner<S: SearchState>: Send {
    fn start_recognition(&mut self) {}

    /// Вернуть сокращённый список.
    fn prune(&mut self, list: ActiveList, arena: &mut TokenArena<S>) -> ActiveList;

    fn stop_recognition(&mut self) {}
}

/// Прунинг абсолютным лучом через [`ActiveList::purge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePruner;

impl<S: SearchState> Pruner<S> for SimplePruner {
    fn prune(&mut self, mut list: ActiveList, arena: &mut TokenArena<S>) -> ActiveList {
        list.purge(arena);
        list
    }
}
