//! Токены и арена токенов.
//!
//! Токен — частичная гипотеза: состояние графа, накопленная оценка и
//! ссылка на предшественника. Цепочки предшественников образуют DAG
//! (многие токены ссылаются на одного предка, циклов нет), поэтому токены
//! живут в арене высказывания и адресуются [`TokenId`]. Предшественник
//! всегда создан раньше потомка, и его индекс меньше.
//!
//! Арена сбрасывается в начале высказывания; между кадрами её можно
//! уплотнить ([`TokenArena::compact`]), оставив только токены, достижимые
//! из активного списка и списка результатов.

use std::collections::HashMap;
use std::sync::Arc;

use acoustic::UnitManager;
use asr_core::LOG_ONE;
use asr_core::log_math::mul;
use linguist::{Pronunciation, SearchState, Word};

/// Индекс токена в арене.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u32);

impl TokenId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Частичная гипотеза.
#[derive(Debug, Clone)]
pub struct Token<S> {
    predecessor: Option<TokenId>,
    state: S,
    score: f32,
    acoustic_score: f32,
    language_score: f32,
    insertion_score: f32,
    frame: usize,
    location: Option<usize>,
    scored: bool,
    props: Option<Box<HashMap<String, f32>>>,
}

impl<S: SearchState> Token<S> {
    /// Начальный токен высказывания.
    pub fn initial(state: S, frame: usize) -> Self {
        Self::new(None, state, LOG_ONE, LOG_ONE, LOG_ONE, frame)
    }

    /// Токен, полученный переходом по дуге.
    pub fn new(
        predecessor: Option<TokenId>,
        state: S,
        score: f32,
        insertion_score: f32,
        language_score: f32,
        frame: usize,
    ) -> Self {
        Self {
            predecessor,
            state,
            score,
            acoustic_score: LOG_ONE,
            language_score,
            insertion_score,
            frame,
            location: None,
            scored: false,
            props: None,
        }
    }

    pub fn predecessor(&self) -> Option<TokenId> {
        self.predecessor
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Накопленная лог-оценка пути.
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn set_score(&mut self, score: f32) {
        self.score = score;
    }

    /// Акустическая оценка последнего кадра.
    pub fn acoustic_score(&self) -> f32 {
        self.acoustic_score
    }

    /// Языковая вероятность дуги, по которой пришёл токен.
    pub fn language_score(&self) -> f32 {
        self.language_score
    }

    /// Вероятность вставки дуги, по которой пришёл токен.
    pub fn insertion_score(&self) -> f32 {
        self.insertion_score
    }

    /// Кадр, на котором создан токен.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Позиция в активном списке (для замены без поиска).
    pub fn location(&self) -> Option<usize> {
        self.location
    }

    pub(crate) fn set_location(&mut self, location: Option<usize>) {
        self.location = location;
    }

    /// Получил ли токен акустическую оценку.
    pub fn is_scored(&self) -> bool {
        self.scored
    }

    /// Прибавить акустическую оценку кадра.
    pub fn apply_acoustic_score(&mut self, acoustic: f32) {
        self.acoustic_score = acoustic;
        self.score = mul(self.score, acoustic);
        self.scored = true;
    }

    /// Сдвинуть оценки на лучшую оценку кадра.
    pub fn normalize_score(&mut self, max_score: f32) {
        self.score -= max_score;
        self.acoustic_score -= max_score;
    }

    pub fn is_emitting(&self) -> bool {
        self.state.is_emitting()
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn is_word(&self) -> bool {
        self.state.is_word()
    }

    pub fn word(&self) -> Option<&Word> {
        self.state.word()
    }

    /// Вспомогательное значение токена.
    pub fn property(&self, key: &str) -> Option<f32> {
        self.props.as_ref()?.get(key).copied()
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: f32) {
        self.props
            .get_or_insert_with(Default::default)
            .insert(key.into(), value);
    }
}

// ---------------------------------------------------------------------------
// Арена
// ---------------------------------------------------------------------------

/// Хранилище токенов одного высказывания.
#[derive(Debug, Clone)]
pub struct TokenArena<S> {
    tokens: Vec<Token<S>>,
    created: usize,
}

impl<S> Default for TokenArena<S> {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            created: 0,
        }
    }
}

/// Таблица перенумерации после уплотнения.
#[derive(Debug, Clone)]
pub struct Remap {
    table: Vec<Option<TokenId>>,
}

impl Remap {
    /// Новый индекс токена или `None`, если токен освобождён.
    pub fn get(&self, old: TokenId) -> Option<TokenId> {
        self.table.get(old.index()).copied().flatten()
    }
}

impl<S: SearchState> TokenArena<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Освободить все токены.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.created = 0;
    }

    pub fn alloc(&mut self, token: Token<S>) -> TokenId {
        let id = TokenId(self.tokens.len() as u32);
        self.tokens.push(token);
        self.created += 1;
        id
    }

    pub fn get(&self, id: TokenId) -> &Token<S> {
        &self.tokens[id.index()]
    }

    pub fn get_mut(&mut self, id: TokenId) -> &mut Token<S> {
        &mut self.tokens[id.index()]
    }

    /// Живые токены.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Токенов создано с начала высказывания (с учётом освобождённых).
    pub fn created(&self) -> usize {
        self.created
    }

    /// Цепочка от токена к началу: сам токен, его предшественник и т.д.
    pub fn path(&self, id: TokenId) -> impl Iterator<Item = &Token<S>> + '_ {
        std::iter::successors(Some(self.get(id)), |t| t.predecessor.map(|p| self.get(p)))
    }

    /// Слова пути в хронологическом порядке.
    pub fn word_path(&self, id: TokenId, with_fillers: bool) -> Vec<String> {
        let mut words: Vec<String> = self
            .path(id)
            .filter_map(|t| t.word())
            .filter(|w| with_fillers || !w.is_filler())
            .map(|w| w.spelling().to_string())
            .collect();
        words.reverse();
        words
    }

    /// Произношения пути в хронологическом порядке.
    pub fn pronunciation_path(&self, id: TokenId) -> Vec<Arc<Pronunciation>> {
        let mut path: Vec<Arc<Pronunciation>> = self
            .path(id)
            .filter_map(|t| t.state().pronunciation().cloned())
            .collect();
        path.reverse();
        path
    }

    /// Слова и юниты пути: `[<s>] K(SIL,AE) AE(K,T) … [CAT]`.
    pub fn word_unit_path(&self, id: TokenId, units: &UnitManager) -> String {
        let mut parts: Vec<String> = self
            .path(id)
            .filter_map(|t| {
                if let Some(word) = t.word() {
                    Some(format!("[{}]", word.spelling()))
                } else {
                    t.state().unit().map(|u| units.name(u).to_string())
                }
            })
            .collect();
        parts.reverse();
        parts.join(" ")
    }

    /// Оставить только токены, достижимые из `roots`, и перенумеровать их.
    ///
    /// Порядок сохраняется, поэтому предшественник по-прежнему имеет
    /// меньший индекс.
    pub fn compact(&mut self, roots: impl IntoIterator<Item = TokenId>) -> Remap {
        let mut live = vec![false; self.tokens.len()];
        for root in roots {
            let mut cursor = Some(root);
            while let Some(id) = cursor {
                if live[id.index()] {
                    break;
                }
                live[id.index()] = true;
                cursor = self.tokens[id.index()].predecessor;
            }
        }

        let mut table = vec![None; self.tokens.len()];
        let mut kept = 0u32;
        for (old, slot) in table.iter_mut().enumerate() {
            if live[old] {
                *slot = Some(TokenId(kept));
                kept += 1;
            }
        }

        let tokens = std::mem::take(&mut self.tokens);
        self.tokens = tokens
            .into_iter()
            .zip(live)
            .filter_map(|(mut token, keep)| {
                if !keep {
                    return None;
                }
                token.predecessor = token.predecessor.and_then(|p| table[p.index()]);
                Some(token)
            })
            .collect();
        Remap { table }
    }
}
