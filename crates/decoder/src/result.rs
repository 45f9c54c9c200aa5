//! Результат распознавания.
//!
//! [`SearchResult`] — снимок поиска на кадре: исправленный активный
//! список, токены конечных состояний и флаг окончания высказывания.
//! Снимок заимствует арену менеджера и живёт до следующего вызова
//! `recognize`. [`Hypothesis`] — владеющая сериализуемая выжимка.

use serde::{Deserialize, Serialize};

use linguist::SearchState;

use crate::token::{TokenArena, TokenId};

/// Слово гипотезы с границами в кадрах.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordSegment {
    pub word: String,
    pub start_frame: usize,
    pub end_frame: usize,
    pub filler: bool,
}

/// Лучшая гипотеза высказывания.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Слова без филлеров.
    pub words: Vec<String>,
    /// Итоговая лог-оценка пути.
    pub score: f32,
    /// Кадр, на котором снят результат.
    pub frame: usize,
    /// Все слова пути (включая филлеры) с границами.
    pub segments: Vec<WordSegment>,
    /// Результат окончательный.
    pub is_final: bool,
}

impl Hypothesis {
    /// Слова через пробел.
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// Снимок поиска на кадре.
#[derive(Debug)]
pub struct SearchResult<'a, S> {
    arena: &'a TokenArena<S>,
    active: Vec<TokenId>,
    finals: &'a [TokenId],
    frame: usize,
    is_final: bool,
}

impl<'a, S: SearchState> SearchResult<'a, S> {
    pub(crate) fn new(
        arena: &'a TokenArena<S>,
        active: Vec<TokenId>,
        finals: &'a [TokenId],
        frame: usize,
        is_final: bool,
    ) -> Self {
        Self {
            arena,
            active,
            finals,
            frame,
            is_final,
        }
    }

    pub fn arena(&self) -> &'a TokenArena<S> {
        self.arena
    }

    /// Токены активного списка после отката последнего шага роста.
    pub fn active_tokens(&self) -> &[TokenId] {
        &self.active
    }

    /// Токены, дошедшие до конечных состояний.
    pub fn final_tokens(&self) -> &'a [TokenId] {
        self.finals
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Последний результат высказывания.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    fn best_of(&self, tokens: &[TokenId]) -> Option<TokenId> {
        let mut best: Option<TokenId> = None;
        for &id in tokens {
            let better = best.is_none_or(|b| self.arena.get(id).score() > self.arena.get(b).score());
            if better {
                best = Some(id);
            }
        }
        best
    }

    pub fn best_final_token(&self) -> Option<TokenId> {
        self.best_of(self.finals)
    }

    pub fn best_active_token(&self) -> Option<TokenId> {
        self.best_of(&self.active)
    }

    /// Лучший конечный токен, а если таких нет — лучший активный.
    pub fn best_token(&self) -> Option<TokenId> {
        self.best_final_token().or_else(|| self.best_active_token())
    }

    /// Активный токен в заданном состоянии.
    pub fn find_token(&self, state: &S) -> Option<TokenId> {
        self.active
            .iter()
            .copied()
            .find(|&id| self.arena.get(id).state() == state)
    }

    /// Слова лучшего пути в хронологическом порядке.
    pub fn word_path(&self, with_fillers: bool) -> Vec<String> {
        self.best_token()
            .map(|id| self.arena.word_path(id, with_fillers))
            .unwrap_or_default()
    }

    /// Слова пути с границами: слово начинается там, где закончилось
    /// предыдущее, и заканчивается на кадре своего токена.
    pub fn segments(&self, id: TokenId) -> Vec<WordSegment> {
        let mut words: Vec<_> = self
            .arena
            .path(id)
            .filter_map(|t| t.word().map(|w| (w, t.frame())))
            .collect();
        words.reverse();

        let mut start = 0;
        words
            .into_iter()
            .map(|(word, end)| {
                let segment = WordSegment {
                    word: word.spelling().to_string(),
                    start_frame: start,
                    end_frame: end,
                    filler: word.is_filler(),
                };
                start = end;
                segment
            })
            .collect()
    }

    /// Лучшая гипотеза; пустая, если токенов нет.
    pub fn hypothesis(&self) -> Hypothesis {
        let Some(best) = self.best_token() else {
            return Hypothesis {
                frame: self.frame,
                is_final: self.is_final,
                ..Hypothesis::default()
            };
        };
        Hypothesis {
            words: self.arena.word_path(best, false),
            score: self.arena.get(best).score(),
            frame: self.frame,
            segments: self.segments(best),
            is_final: self.is_final,
        }
    }
}
