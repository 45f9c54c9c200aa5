//! Активный список: живые токены текущего кадра.
//!
//! Список не проверяет рекомбинацию сам: `add` вставляет безусловно,
//! а единственность токена на состояние обеспечивает шаг роста через
//! `replace`. Каждый токен помнит свою позицию в списке, поэтому замена
//! не ищет токен перебором.

use asr_core::log_math::mul;
use asr_core::{AsrResult, LOG_ZERO, LogMath, SearchConfig};
use linguist::SearchState;
use tracing::warn;

use crate::token::{Remap, TokenArena, TokenId};

/// Токены кадра с лучшим токеном и параметрами лучей.
#[derive(Debug, Clone)]
pub struct ActiveList {
    tokens: Vec<TokenId>,
    best: Option<TokenId>,
    absolute_beam_width: Option<usize>,
    log_relative_beam_width: Option<f32>,
}

impl ActiveList {
    /// Пустой список.
    ///
    /// `log_relative_beam_width` — относительный луч в лог-области (≤ 0).
    pub fn new(absolute_beam_width: Option<usize>, log_relative_beam_width: Option<f32>) -> Self {
        Self {
            tokens: Vec::new(),
            best: None,
            absolute_beam_width,
            log_relative_beam_width,
        }
    }

    /// Пустой список с теми же параметрами.
    pub fn new_instance(&self) -> Self {
        Self::new(self.absolute_beam_width, self.log_relative_beam_width)
    }

    /// Добавить токен и обновить лучший.
    pub fn add<S: SearchState>(&mut self, arena: &mut TokenArena<S>, id: TokenId) {
        arena.get_mut(id).set_location(Some(self.tokens.len()));
        self.tokens.push(id);
        self.update_best(arena, id);
    }

    /// Заменить `old` на `new` на месте; если `old` уже не в списке — добавить.
    pub fn replace<S: SearchState>(
        &mut self,
        arena: &mut TokenArena<S>,
        old: Option<TokenId>,
        new: TokenId,
    ) {
        let Some(old) = old else {
            self.add(arena, new);
            return;
        };
        let location = arena
            .get(old)
            .location()
            .filter(|&loc| self.tokens.get(loc) == Some(&old));
        let Some(location) = location else {
            warn!("Токен {old:?} не найден в активном списке, добавляю {new:?}");
            self.add(arena, new);
            return;
        };
        self.tokens[location] = new;
        arena.get_mut(old).set_location(None);
        arena.get_mut(new).set_location(Some(location));
        if self.best == Some(old) {
            self.best = Some(new);
        }
        self.update_best(arena, new);
    }

    fn update_best<S: SearchState>(&mut self, arena: &TokenArena<S>, id: TokenId) {
        let better = match self.best {
            None => true,
            Some(best) => arena.get(id).score() > arena.get(best).score(),
        };
        if better {
            self.best = Some(id);
        }
    }

    /// Оставить не больше `absolute_beam_width` лучших токенов.
    ///
    /// Используется частичное упорядочивание: важна только граница top-K,
    /// порядок внутри неё не определён. Относительный луч здесь не
    /// применяется: его проверяет шаг роста через [`Self::beam_threshold`].
    pub fn purge<S: SearchState>(&mut self, arena: &mut TokenArena<S>) -> &mut Self {
        let Some(width) = self.absolute_beam_width else {
            return self;
        };
        if self.tokens.len() <= width {
            return self;
        }
        self.tokens.select_nth_unstable_by(width - 1, |a, b| {
            arena.get(*b).score().total_cmp(&arena.get(*a).score())
        });
        for &dropped in &self.tokens[width..] {
            arena.get_mut(dropped).set_location(None);
        }
        self.tokens.truncate(width);
        for (location, &id) in self.tokens.iter().enumerate() {
            arena.get_mut(id).set_location(Some(location));
        }
        self
    }

    /// Порог относительного луча: оценка лучшего плюс лог-ширина луча.
    ///
    /// `LOG_ZERO`, если луч выключен или список пуст.
    pub fn beam_threshold<S: SearchState>(&self, arena: &TokenArena<S>) -> f32 {
        match self.log_relative_beam_width {
            Some(width) => mul(self.best_score(arena), width),
            None => LOG_ZERO,
        }
    }

    pub fn best_score<S: SearchState>(&self, arena: &TokenArena<S>) -> f32 {
        self.best.map_or(LOG_ZERO, |id| arena.get(id).score())
    }

    pub fn best(&self) -> Option<TokenId> {
        self.best
    }

    pub fn set_best(&mut self, best: Option<TokenId>) {
        self.best = best;
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn absolute_beam_width(&self) -> Option<usize> {
        self.absolute_beam_width
    }

    pub fn log_relative_beam_width(&self) -> Option<f32> {
        self.log_relative_beam_width
    }

    /// Перенумеровать токены после уплотнения арены.
    pub fn remap(&mut self, remap: &Remap) {
        self.tokens.retain_mut(|id| match remap.get(*id) {
            Some(new) => {
                *id = new;
                true
            }
            None => false,
        });
        self.best = self.best.and_then(|b| remap.get(b));
    }
}

/// Фабрика активных списков из конфигурации поиска.
#[derive(Debug, Clone, Copy)]
pub struct ActiveListFactory {
    absolute_beam_width: Option<usize>,
    log_relative_beam_width: Option<f32>,
}

impl ActiveListFactory {
    /// Перевести относительный луч в лог-область.
    pub fn new(config: &SearchConfig, log_math: &LogMath) -> AsrResult<Self> {
        config.validate()?;
        let log_relative_beam_width = config
            .relative_beam_width
            .map(|w| log_math.linear_to_log(w))
            .transpose()?;
        Ok(Self {
            absolute_beam_width: config.absolute_beam_width,
            log_relative_beam_width,
        })
    }

    pub fn new_instance(&self) -> ActiveList {
        ActiveList::new(self.absolute_beam_width, self.log_relative_beam_width)
    }
}
