//! Скоринг сенонов: лог-правдоподобие кадра для распределения выхода.
//!
//! Две точки расширения:
//! - [`ScoreProvider`] — оценка одного сенона (используется скорерами,
//!   которые считают только активные состояния);
//! - [`FrameScorer`] — оценки всех сенонов кадра за один проход
//!   (батчевый скоринг, см. [`crate::tensor::TensorSenoneScorer`]).

use asr_core::{AsrError, AsrResult, LogMath};

use crate::hmm::SenoneId;

/// Оценка одного сенона для кадра признаков.
pub trait ScoreProvider: Send + Sync {
    /// Лог-правдоподобие (в основании декодера) сенона для кадра.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Scoring` при несовпадении размерности или неизвестном сеноне.
    fn senone_score(&self, senone: SenoneId, features: &[f32]) -> AsrResult<f32>;

    /// Число сенонов.
    fn num_senones(&self) -> usize;
}

/// Оценки всех сенонов кадра разом.
pub trait FrameScorer: Send + Sync {
    /// Вектор лог-правдоподобий, индексируемый [`SenoneId`].
    fn score_frame(&self, features: &[f32]) -> AsrResult<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Смесь гауссиан с диагональной ковариацией
// ---------------------------------------------------------------------------

/// Минимальная дисперсия по умолчанию.
pub const DEFAULT_VARIANCE_FLOOR: f32 = 1e-4;

/// Смесь диагональных гауссиан (натуральный логарифм внутри).
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    /// `ln w_m + ln C_m` для каждой компоненты.
    log_constants: Vec<f32>,
    means: Vec<Vec<f32>>,
    /// `0.5 / var`.
    precisions: Vec<Vec<f32>>,
}

impl GaussianMixture {
    /// Создать смесь; веса нормализуются, дисперсии ограничиваются снизу.
    pub fn new(
        weights: &[f32],
        means: Vec<Vec<f32>>,
        variances: Vec<Vec<f32>>,
        variance_floor: f32,
    ) -> AsrResult<Self> {
        let m = weights.len();
        if m == 0 || means.len() != m || variances.len() != m {
            return Err(AsrError::Model(format!(
                "смесь: {m} весов, {} средних, {} дисперсий",
                means.len(),
                variances.len()
            )));
        }
        let dimension = means[0].len();
        if means.iter().chain(variances.iter()).any(|v| v.len() != dimension) {
            return Err(AsrError::Model(
                "смесь: компоненты разной размерности".to_string(),
            ));
        }
        let total: f32 = weights.iter().sum();
        if !(total > 0.0) || weights.iter().any(|w| *w < 0.0) {
            return Err(AsrError::Model("смесь: некорректные веса".to_string()));
        }

        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let mut log_constants = Vec::with_capacity(m);
        let mut precisions = Vec::with_capacity(m);
        for (weight, var) in weights.iter().zip(&variances) {
            let floored: Vec<f32> = var.iter().map(|v| v.max(variance_floor)).collect();
            let log_det: f64 = floored.iter().map(|v| (*v as f64).ln()).sum();
            let log_weight = ((*weight / total) as f64).ln();
            log_constants.push((log_weight - 0.5 * (dimension as f64 * ln_2pi + log_det)) as f32);
            precisions.push(floored.iter().map(|v| 0.5 / v).collect());
        }
        Ok(Self {
            log_constants,
            means,
            precisions,
        })
    }

    pub fn dimension(&self) -> usize {
        self.means[0].len()
    }

    pub fn num_components(&self) -> usize {
        self.means.len()
    }

    pub(crate) fn log_constants(&self) -> &[f32] {
        &self.log_constants
    }

    pub(crate) fn means(&self) -> &[Vec<f32>] {
        &self.means
    }

    pub(crate) fn precisions(&self) -> &[Vec<f32>] {
        &self.precisions
    }

    /// Натуральный лог-правдоподобие кадра.
    pub fn score_ln(&self, features: &[f32]) -> f64 {
        let component_scores: Vec<f64> = self
            .log_constants
            .iter()
            .zip(self.means.iter().zip(&self.precisions))
            .map(|(c, (mean, precision))| {
                let distance: f32 = features
                    .iter()
                    .zip(mean.iter().zip(precision))
                    .map(|(x, (mu, p))| (x - mu) * (x - mu) * p)
                    .sum();
                (*c - distance) as f64
            })
            .collect();
        let max = component_scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if max == f64::NEG_INFINITY {
            return max;
        }
        max + component_scores
            .iter()
            .map(|s| (s - max).exp())
            .sum::<f64>()
            .ln()
    }
}

/// Набор сенонов-смесей модели.
#[derive(Debug, Clone)]
pub struct GaussianMixtureSet {
    mixtures: Vec<GaussianMixture>,
    dimension: usize,
    log_math: LogMath,
}

impl GaussianMixtureSet {
    pub fn new(mixtures: Vec<GaussianMixture>, log_math: LogMath) -> AsrResult<Self> {
        let dimension = mixtures.first().map(|m| m.dimension()).unwrap_or(0);
        if mixtures.iter().any(|m| m.dimension() != dimension) {
            return Err(AsrError::Model(
                "сеноны разной размерности признаков".to_string(),
            ));
        }
        Ok(Self {
            mixtures,
            dimension,
            log_math,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn mixtures(&self) -> &[GaussianMixture] {
        &self.mixtures
    }

    pub fn log_math(&self) -> &LogMath {
        &self.log_math
    }

    fn check_dimension(&self, features: &[f32]) -> AsrResult<()> {
        if features.len() != self.dimension {
            return Err(AsrError::Scoring(format!(
                "размерность кадра {} != {}",
                features.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

impl ScoreProvider for GaussianMixtureSet {
    fn senone_score(&self, senone: SenoneId, features: &[f32]) -> AsrResult<f32> {
        self.check_dimension(features)?;
        let mixture = self
            .mixtures
            .get(senone.index())
            .ok_or_else(|| AsrError::Scoring(format!("неизвестный сенон {}", senone.0)))?;
        Ok(self.log_math.ln_to_log(mixture.score_ln(features)))
    }

    fn num_senones(&self) -> usize {
        self.mixtures.len()
    }
}

impl FrameScorer for GaussianMixtureSet {
    fn score_frame(&self, features: &[f32]) -> AsrResult<Vec<f32>> {
        self.check_dimension(features)?;
        Ok(self
            .mixtures
            .iter()
            .map(|m| self.log_math.ln_to_log(m.score_ln(features)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Готовые оценки (гибридные модели)
// ---------------------------------------------------------------------------

/// Кадр уже содержит лог-правдоподобия сенонов: `values[senone]`.
///
/// Подходит для гибридных DNN-HMM систем, где оценки считаются внешней
/// сетью, и для тестовых фикстур.
#[derive(Debug, Clone, Copy)]
pub struct PrecomputedScores {
    num_senones: usize,
}

impl PrecomputedScores {
    pub fn new(num_senones: usize) -> Self {
        Self { num_senones }
    }
}

impl ScoreProvider for PrecomputedScores {
    fn senone_score(&self, senone: SenoneId, features: &[f32]) -> AsrResult<f32> {
        if features.len() < self.num_senones {
            return Err(AsrError::Scoring(format!(
                "кадр содержит {} оценок, ожидалось {}",
                features.len(),
                self.num_senones
            )));
        }
        features
            .get(senone.index())
            .copied()
            .ok_or_else(|| AsrError::Scoring(format!("неизвестный сенон {}", senone.0)))
    }

    fn num_senones(&self) -> usize {
        self.num_senones
    }
}

impl FrameScorer for PrecomputedScores {
    fn score_frame(&self, features: &[f32]) -> AsrResult<Vec<f32>> {
        if features.len() < self.num_senones {
            return Err(AsrError::Scoring(format!(
                "кадр содержит {} оценок, ожидалось {}",
                features.len(),
                self.num_senones
            )));
        }
        Ok(features[..self.num_senones].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_gaussian() -> GaussianMixture {
        GaussianMixture::new(&[1.0], vec![vec![0.0, 0.0]], vec![vec![1.0, 1.0]], 1e-4).unwrap()
    }

    #[test]
    fn test_single_gaussian_at_mean() {
        let g = unit_gaussian();
        let expected = -(2.0 * std::f64::consts::PI).ln();
        assert!((g.score_ln(&[0.0, 0.0]) - expected).abs() < 1e-5);
        assert!(g.score_ln(&[1.0, 1.0]) < g.score_ln(&[0.0, 0.0]));
    }

    #[test]
    fn test_mixture_of_identical_components() {
        let two = GaussianMixture::new(
            &[0.5, 0.5],
            vec![vec![0.0, 0.0], vec![0.0, 0.0]],
            vec![vec![1.0, 1.0], vec![1.0, 1.0]],
            1e-4,
        )
        .unwrap();
        let one = unit_gaussian();
        assert!((two.score_ln(&[0.3, -0.2]) - one.score_ln(&[0.3, -0.2])).abs() < 1e-5);
    }

    #[test]
    fn test_set_dimension_check() {
        let set = GaussianMixtureSet::new(vec![unit_gaussian()], LogMath::natural()).unwrap();
        assert!(set.senone_score(SenoneId(0), &[0.0]).is_err());
        assert!(set.senone_score(SenoneId(3), &[0.0, 0.0]).is_err());
        let frame = set.score_frame(&[0.0, 0.0]).unwrap();
        assert_eq!(frame.len(), 1);
        assert!((frame[0] - set.senone_score(SenoneId(0), &[0.0, 0.0]).unwrap()).abs() < 1e-6);
    }

    #[test]
    fn test_precomputed_scores() {
        let scores = PrecomputedScores::new(3);
        assert_eq!(scores.senone_score(SenoneId(1), &[-1.0, -2.0, -3.0]).unwrap(), -2.0);
        assert!(scores.senone_score(SenoneId(0), &[-1.0]).is_err());
        assert_eq!(scores.score_frame(&[-1.0, -2.0, -3.0, 9.0]).unwrap(), vec![-1.0, -2.0, -3.0]);
    }
}
