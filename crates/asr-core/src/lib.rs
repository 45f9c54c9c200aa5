//! # asr-core
//!
//! Базовые типы, трейты и определения ошибок для декодера RustASR.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Лог-арифметика с фиксированным основанием ([`LogMath`])
//! - Типы потока данных (`FeatureFrame`, `Signal`, `Data`)
//! - Конфигурация декодера ([`DecoderConfig`])
//! - Унифицированная обработка ошибок через `AsrError`
//! - Trait [`FrameSource`] — источник кадров признаков

pub mod config;
pub mod debug;
pub mod error;
pub mod log_math;
pub mod traits;
pub mod types;

pub use config::{
    DecoderConfig, LexTreeConfig, ScorerConfig, ScorerStrategy, SearchConfig, TieBreak,
};
pub use error::{AsrError, AsrResult};
pub use log_math::{LOG_ONE, LOG_ZERO, LogMath};
pub use traits::FrameSource;
pub use types::{Data, FeatureFrame, Signal, VecFrameSource};
