//! Конфигурационные структуры декодера.
//!
//! Все структуры сериализуются через serde и могут быть загружены из JSON
//! целиком ([`DecoderConfig::from_json_file`]) или частично: отсутствующие
//! поля берутся из `Default`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AsrError, AsrResult};
use crate::log_math::{DEFAULT_LOG_BASE, LogMath};

/// Полная конфигурация декодера.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Основание логарифма для всех оценок.
    pub log_base: f32,

    /// Использовать таблицу сложения в лог-области.
    pub use_add_table: bool,

    /// Параметры поиска и прунинга.
    pub search: SearchConfig,

    /// Параметры акустического скорера.
    pub scorer: ScorerConfig,

    /// Параметры компиляции лексического дерева.
    pub lextree: LexTreeConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::large_vocabulary()
    }
}

impl DecoderConfig {
    /// Конфигурация для словаря на тысячи слов (лексическое дерево + униграммы).
    pub fn large_vocabulary() -> Self {
        Self {
            log_base: DEFAULT_LOG_BASE,
            use_add_table: true,
            search: SearchConfig {
                absolute_beam_width: Some(20_000),
                relative_beam_width: Some(1e-60),
                relative_word_beam_width: Some(1e-40),
                want_entry_pruning: true,
                ..SearchConfig::default()
            },
            scorer: ScorerConfig {
                strategy: ScorerStrategy::Threaded,
                ..ScorerConfig::default()
            },
            lextree: LexTreeConfig::default(),
        }
    }

    /// Конфигурация для небольших грамматик: без абсолютного луча.
    pub fn small_grammar() -> Self {
        Self {
            log_base: DEFAULT_LOG_BASE,
            use_add_table: true,
            search: SearchConfig {
                absolute_beam_width: None,
                relative_beam_width: Some(1e-80),
                relative_word_beam_width: None,
                want_entry_pruning: false,
                ..SearchConfig::default()
            },
            scorer: ScorerConfig::default(),
            lextree: LexTreeConfig {
                language_weight: 1.0,
                ..LexTreeConfig::default()
            },
        }
    }

    /// Загрузить конфигурацию из JSON-файла и проверить её.
    pub fn from_json_file(path: impl AsRef<Path>) -> AsrResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Конфигурация декодера загружена из {}", path.display());
        Ok(config)
    }

    /// Проверить согласованность параметров.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Config` для нулевых/отрицательных лучей, основания ≤ 1,
    /// нулевого числа потоков и неположительного языкового веса.
    pub fn validate(&self) -> AsrResult<()> {
        if !(self.log_base > 1.0) {
            return Err(AsrError::Config(format!(
                "log_base должно быть > 1, получено {}",
                self.log_base
            )));
        }
        self.search.validate()?;
        self.scorer.validate()?;
        self.lextree.validate()
    }

    /// Создать лог-арифметику для этой конфигурации.
    pub fn log_math(&self) -> AsrResult<LogMath> {
        LogMath::new(self.log_base, self.use_add_table)
    }
}

// ---------------------------------------------------------------------------
// Поиск
// ---------------------------------------------------------------------------

/// Правило выбора при равенстве оценок двух токенов в одном состоянии.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// При равенстве побеждает пришедший позже токен (`>=`).
    #[default]
    PreferNewer,
    /// При равенстве остаётся уже записанный токен (`>`).
    PreferExisting,
}

impl TieBreak {
    /// Вытесняет ли кандидат с оценкой `candidate` токен с оценкой `existing`.
    pub fn replaces(self, existing: f32, candidate: f32) -> bool {
        match self {
            TieBreak::PreferNewer => candidate >= existing,
            TieBreak::PreferExisting => candidate > existing,
        }
    }
}

/// Параметры поиска в ширину.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Максимальное число токенов в активном списке (`None` — без ограничения).
    pub absolute_beam_width: Option<usize>,

    /// Относительный луч в линейной шкале, например `1e-80`.
    pub relative_beam_width: Option<f64>,

    /// Относительный луч для состояний-слов (отдельный от основного).
    pub relative_word_beam_width: Option<f64>,

    /// Отсекать ветви по порогам уже при вычислении оценки входа.
    pub want_entry_pruning: bool,

    /// Пропускать рост на каждом N-м кадре (0 — не пропускать).
    pub grow_skip_interval: usize,

    /// Правило равенства при рекомбинации.
    pub tie_break: TieBreak,

    /// Каждые N кадров освобождать недостижимые токены (0 — никогда).
    pub gc_interval_frames: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            absolute_beam_width: None,
            relative_beam_width: None,
            relative_word_beam_width: None,
            want_entry_pruning: false,
            grow_skip_interval: 0,
            tie_break: TieBreak::default(),
            gc_interval_frames: 100,
        }
    }
}

impl SearchConfig {
    /// Проверить ширины лучей.
    pub fn validate(&self) -> AsrResult<()> {
        if self.absolute_beam_width == Some(0) {
            return Err(AsrError::Config(
                "absolute_beam_width должен быть > 0".to_string(),
            ));
        }
        check_relative_beam("relative_beam_width", self.relative_beam_width)?;
        check_relative_beam("relative_word_beam_width", self.relative_word_beam_width)
    }
}

fn check_relative_beam(name: &str, value: Option<f64>) -> AsrResult<()> {
    match value {
        Some(v) if !(v > 0.0 && v <= 1.0) => Err(AsrError::Config(format!(
            "{name} должен лежать в (0, 1], получено {v}"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Скорер
// ---------------------------------------------------------------------------

/// Стратегия акустического скоринга.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerStrategy {
    /// Последовательный скоринг в вызывающем потоке.
    #[default]
    Simple,
    /// Пул рабочих потоков, активный список режется на куски.
    Threaded,
    /// Все сеноны кадра за один тензорный проход.
    Batch,
}

/// Параметры акустического скорера.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Выбранная стратегия.
    pub strategy: ScorerStrategy,

    /// Число рабочих потоков.
    pub num_threads: usize,

    /// Прибавлять к `num_threads` число доступных CPU.
    pub cpu_relative: bool,

    /// Минимальный размер куска на один поток.
    pub min_scoreables_per_thread: usize,

    /// Нормализовать оценки на лучшую в кадре.
    pub normalize_scores: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            strategy: ScorerStrategy::Simple,
            num_threads: 1,
            cpu_relative: true,
            min_scoreables_per_thread: 10,
            normalize_scores: false,
        }
    }
}

impl ScorerConfig {
    /// Проверить параметры пула.
    pub fn validate(&self) -> AsrResult<()> {
        if self.num_threads == 0 && !self.cpu_relative {
            return Err(AsrError::Config(
                "num_threads должен быть > 0 (или cpu_relative = true)".to_string(),
            ));
        }
        if self.min_scoreables_per_thread == 0 {
            return Err(AsrError::Config(
                "min_scoreables_per_thread должен быть > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Итоговое число рабочих потоков с учётом `cpu_relative`.
    pub fn effective_threads(&self) -> usize {
        let cpus = if self.cpu_relative {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            0
        };
        (self.num_threads + cpus).max(1)
    }
}

// ---------------------------------------------------------------------------
// Лексическое дерево
// ---------------------------------------------------------------------------

/// Параметры компиляции лексического дерева и графа поиска.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexTreeConfig {
    /// Вес языковой модели (множитель к униграммным логарифмам).
    pub language_weight: f32,

    /// Вероятность вставки слова (линейная).
    pub word_insertion_probability: f64,

    /// Вероятность вставки тишины (линейная).
    pub silence_insertion_probability: f64,

    /// Вероятность вставки филлера (линейная).
    pub filler_insertion_probability: f64,

    /// Добавлять в дерево все филлеры, а не только тишину.
    pub add_filler_words: bool,
}

impl Default for LexTreeConfig {
    fn default() -> Self {
        Self {
            language_weight: 8.0,
            word_insertion_probability: 1.0,
            silence_insertion_probability: 1.0,
            filler_insertion_probability: 1e-2,
            add_filler_words: false,
        }
    }
}

impl LexTreeConfig {
    /// Проверить веса.
    pub fn validate(&self) -> AsrResult<()> {
        if !(self.language_weight > 0.0) {
            return Err(AsrError::Config(format!(
                "language_weight должен быть > 0, получено {}",
                self.language_weight
            )));
        }
        for (name, value) in [
            ("word_insertion_probability", self.word_insertion_probability),
            ("silence_insertion_probability", self.silence_insertion_probability),
            ("filler_insertion_probability", self.filler_insertion_probability),
        ] {
            if !(value > 0.0) {
                return Err(AsrError::Config(format!(
                    "{name} должна быть > 0, получено {value}"
                )));
            }
        }
        Ok(())
    }
}
