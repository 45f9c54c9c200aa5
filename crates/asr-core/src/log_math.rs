//! Арифметика в логарифмической области с фиксированным основанием.
//!
//! Все оценки декодера хранятся как логарифмы вероятностей по основанию
//! `log_base` (по умолчанию 1.0001). Умножение вероятностей становится
//! сложением, а сложение вероятностей выполняется через `add_as_linear`
//! с таблицей поправок `log(1 + base^-d)`.
//!
//! В отличие от глобального синглтона, [`LogMath`] — обычный объект,
//! который создаётся один раз при загрузке модели и передаётся по ссылке.

use std::sync::Arc;

use crate::error::{AsrError, AsrResult};

/// Логарифм нуля: наименьшее конечное значение `f32`.
pub const LOG_ZERO: f32 = -f32::MAX;

/// Логарифм единицы.
pub const LOG_ONE: f32 = 0.0;

/// Основание логарифма по умолчанию.
pub const DEFAULT_LOG_BASE: f32 = 1.0001;

/// Предельный размер таблицы сложения.
const MAX_ADD_TABLE_ENTRIES: usize = 150_000;

/// Лог-арифметика с заданным основанием.
#[derive(Debug, Clone)]
pub struct LogMath {
    log_base: f64,
    natural_log_base: f64,
    inverse_natural_log_base: f64,
    max_log_value: f64,
    min_log_value: f64,
    add_table: Option<Arc<[f32]>>,
}

impl Default for LogMath {
    fn default() -> Self {
        // Для основания 1.0001 таблица всегда строится корректно.
        Self::build(DEFAULT_LOG_BASE as f64)
            .with_table()
            .unwrap_or_else(|_| Self::build(DEFAULT_LOG_BASE as f64))
    }
}

impl LogMath {
    /// Создать лог-арифметику с основанием `log_base`.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Config`, если основание не больше 1, или если таблица
    /// сложения запрошена, но для такого основания она вырождается.
    pub fn new(log_base: f32, use_add_table: bool) -> AsrResult<Self> {
        if !(log_base > 1.0) || !log_base.is_finite() {
            return Err(AsrError::Config(format!(
                "основание логарифма должно быть > 1, получено {log_base}"
            )));
        }
        let math = Self::build(log_base as f64);
        if use_add_table { math.with_table() } else { Ok(math) }
    }

    /// Натуральный логарифм (основание e), без таблицы сложения.
    pub fn natural() -> Self {
        Self::build(std::f64::consts::E)
    }

    fn build(log_base: f64) -> Self {
        let natural_log_base = log_base.ln();
        let inverse_natural_log_base = 1.0 / natural_log_base;
        Self {
            log_base,
            natural_log_base,
            inverse_natural_log_base,
            max_log_value: f64::MAX.ln() * inverse_natural_log_base,
            min_log_value: f64::MIN_POSITIVE.ln() * inverse_natural_log_base,
            add_table: None,
        }
    }

    fn with_table(mut self) -> AsrResult<Self> {
        let raw = -(self.linear_to_log_f64(self.log_to_linear(0.5) - 1.0)).round();
        if !(raw >= 1.0) {
            return Err(AsrError::Config(format!(
                "основание {} даёт вырожденную таблицу сложения",
                self.log_base
            )));
        }
        let entries = (raw as usize).min(MAX_ADD_TABLE_ENTRIES);
        let table: Vec<f32> = (0..entries)
            .map(|index| {
                let inner = self.log_to_linear(-(index as f32)) + 1.0;
                self.linear_to_log_f64(inner) as f32
            })
            .collect();
        self.add_table = Some(table.into());
        Ok(self)
    }

    /// Основание логарифма.
    pub fn log_base(&self) -> f32 {
        self.log_base as f32
    }

    /// Используется ли таблица сложения.
    pub fn uses_add_table(&self) -> bool {
        self.add_table.is_some()
    }

    /// Перевод линейного значения в лог-область.
    ///
    /// Ноль отображается в [`LOG_ZERO`], отрицательные значения — ошибка.
    pub fn linear_to_log(&self, linear: f64) -> AsrResult<f32> {
        if linear < 0.0 || linear.is_nan() {
            return Err(AsrError::Config(format!(
                "linear_to_log: отрицательный аргумент {linear}"
            )));
        }
        Ok(self.linear_to_log_f64(linear) as f32)
    }

    fn linear_to_log_f64(&self, linear: f64) -> f64 {
        if linear <= 0.0 {
            return LOG_ZERO as f64;
        }
        let value = linear.ln() * self.inverse_natural_log_base;
        value.clamp(-(f32::MAX as f64), f32::MAX as f64)
    }

    /// Перевод из лог-области в линейную.
    pub fn log_to_linear(&self, log_value: f32) -> f64 {
        let log_value = log_value as f64;
        if log_value < self.min_log_value {
            0.0
        } else if log_value > self.max_log_value {
            f64::MAX
        } else {
            (log_value * self.natural_log_base).exp()
        }
    }

    /// Сложение двух вероятностей, заданных логарифмами.
    pub fn add_as_linear(&self, log_a: f32, log_b: f32) -> f32 {
        let (highest, difference) = if log_a > log_b {
            (log_a, log_a - log_b)
        } else {
            (log_b, log_b - log_a)
        };
        saturate(highest + self.add_table_value(difference))
    }

    fn add_table_value(&self, difference: f32) -> f32 {
        match &self.add_table {
            Some(table) => {
                let index = (difference + 0.5) as usize;
                table.get(index).copied().unwrap_or(0.0)
            }
            None => {
                let inner = self.log_to_linear(-difference) + 1.0;
                self.linear_to_log_f64(inner) as f32
            }
        }
    }

    /// Вычитание вероятностей в лог-области: `log(a - b)`.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Config`, если уменьшаемое меньше вычитаемого.
    pub fn subtract_as_linear(&self, log_minuend: f32, log_subtrahend: f32) -> AsrResult<f32> {
        if log_minuend < log_subtrahend {
            return Err(AsrError::Config(format!(
                "subtract_as_linear: {log_minuend} < {log_subtrahend}"
            )));
        }
        let inner = 1.0 - self.log_to_linear(log_subtrahend - log_minuend);
        Ok(saturate(log_minuend + self.linear_to_log_f64(inner) as f32))
    }

    /// Перевод логарифма между основаниями.
    pub fn log_to_log(log_source: f32, source_base: f32, result_base: f32) -> AsrResult<f32> {
        if !(source_base > 0.0) || !(result_base > 0.0) || result_base == 1.0 {
            return Err(AsrError::Config(format!(
                "log_to_log: недопустимые основания {source_base} -> {result_base}"
            )));
        }
        if log_source <= LOG_ZERO {
            return Ok(LOG_ZERO);
        }
        let factor = (source_base as f64).ln() / (result_base as f64).ln();
        Ok(clamp_f64(log_source as f64 * factor))
    }

    /// Натуральный логарифм → лог-область.
    pub fn ln_to_log(&self, ln_value: f64) -> f32 {
        if ln_value <= LOG_ZERO as f64 {
            return LOG_ZERO;
        }
        clamp_f64(ln_value * self.inverse_natural_log_base)
    }

    /// Лог-область → натуральный логарифм.
    pub fn log_to_ln(&self, log_value: f32) -> f64 {
        if log_value <= LOG_ZERO {
            return f64::NEG_INFINITY;
        }
        log_value as f64 * self.natural_log_base
    }

    /// Десятичный логарифм (формат ARPA) → лог-область.
    pub fn log10_to_log(&self, log10_value: f32) -> f32 {
        if log10_value <= LOG_ZERO {
            return LOG_ZERO;
        }
        self.ln_to_log(log10_value as f64 * std::f64::consts::LN_10)
    }
}

/// Произведение вероятностей в лог-области с насыщением в [`LOG_ZERO`].
pub fn mul(log_a: f32, log_b: f32) -> f32 {
    if log_a <= LOG_ZERO || log_b <= LOG_ZERO {
        LOG_ZERO
    } else {
        saturate(log_a + log_b)
    }
}

fn saturate(value: f32) -> f32 {
    if value.is_nan() { LOG_ZERO } else { value.clamp(LOG_ZERO, f32::MAX) }
}

fn clamp_f64(value: f64) -> f32 {
    value.clamp(LOG_ZERO as f64, f32::MAX as f64) as f32
}
