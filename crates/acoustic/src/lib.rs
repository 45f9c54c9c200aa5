//! # acoustic
//!
//! Акустическая модель для декодера RustASR:
//!
//! - Юниты и их пул ([`UnitManager`])
//! - HMM с проверкой топологии ([`Hmm`])
//! - Трейт [`AcousticModel`] и модель в памяти [`TiedStateModel`]
//! - Пул контекстных HMM с приближённым поиском ([`HmmPool`])
//! - Скоринг сенонов: смеси гауссиан, готовые оценки, батчевый candle-скорер

pub mod hmm;
pub mod model;
pub mod pool;
pub mod senone;
pub mod tensor;
pub mod unit;

pub use hmm::{Hmm, HmmId, HmmPosition, SenoneId};
pub use model::{AcousticModel, ModelDefinition, TiedStateModel, TiedStateModelBuilder};
pub use pool::HmmPool;
pub use senone::{FrameScorer, GaussianMixture, GaussianMixtureSet, PrecomputedScores, ScoreProvider};
pub use tensor::TensorSenoneScorer;
pub use unit::{SILENCE_NAME, Unit, UnitId, UnitManager};
