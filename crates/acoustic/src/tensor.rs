//! Батчевый скоринг сенонов на candle.
//!
//! Все компоненты всех смесей укладываются в один тензор `[G, D]`, и кадр
//! оценивается за один проход:
//!
//! 1. `dist = sum_d (x_d - mu_gd)^2 * p_gd` для всех компонент;
//! 2. `ll = c_g - dist`, форма `[S, M]` (смеси дополнены до общего `M`);
//! 3. `logsumexp` по компонентам, перевод в основание декодера.

use asr_core::AsrResult;
use candle_core::{DType, Device, Tensor};
use tracing::debug;

use crate::senone::{FrameScorer, GaussianMixtureSet};

/// Константа для пустых (дополняющих) компонент: `exp` от неё равен нулю.
const PADDING_LOG_CONSTANT: f32 = -1.0e30;

/// Оценка всех сенонов кадра одним тензорным проходом.
#[derive(Debug)]
pub struct TensorSenoneScorer {
    means: Tensor,
    precisions: Tensor,
    log_constants: Tensor,
    num_senones: usize,
    components: usize,
    dimension: usize,
    inverse_ln_base: f64,
    device: Device,
}

impl TensorSenoneScorer {
    /// Перенести набор смесей на устройство.
    pub fn from_mixtures(set: &GaussianMixtureSet, device: &Device) -> AsrResult<Self> {
        let num_senones = set.mixtures().len();
        let dimension = set.dimension();
        let components = set
            .mixtures()
            .iter()
            .map(|m| m.num_components())
            .max()
            .unwrap_or(1);
        let rows = num_senones * components;

        let mut means = vec![0.0f32; rows * dimension];
        let mut precisions = vec![0.0f32; rows * dimension];
        let mut log_constants = vec![PADDING_LOG_CONSTANT; rows];
        for (s, mixture) in set.mixtures().iter().enumerate() {
            for (m, (mean, precision)) in mixture
                .means()
                .iter()
                .zip(mixture.precisions())
                .enumerate()
            {
                let row = s * components + m;
                means[row * dimension..(row + 1) * dimension].copy_from_slice(mean);
                precisions[row * dimension..(row + 1) * dimension].copy_from_slice(precision);
                log_constants[row] = mixture.log_constants()[m];
            }
        }

        debug!(
            "TensorSenoneScorer: {} сенонов x {} компонент, D={}",
            num_senones, components, dimension
        );

        let inverse_ln_base = 1.0 / (set.log_math().log_base() as f64).ln();
        Ok(Self {
            means: Tensor::from_vec(means, (rows, dimension), device)?,
            precisions: Tensor::from_vec(precisions, (rows, dimension), device)?,
            log_constants: Tensor::from_vec(log_constants, (num_senones, components), device)?,
            num_senones,
            components,
            dimension,
            inverse_ln_base,
            device: device.clone(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn score_tensor(&self, features: &[f32]) -> candle_core::Result<Vec<f32>> {
        if features.len() != self.dimension {
            candle_core::bail!(
                "размерность кадра {} != {}",
                features.len(),
                self.dimension
            );
        }
        let x = Tensor::from_slice(features, (1, self.dimension), &self.device)?;
        let distance = self
            .means
            .broadcast_sub(&x)?
            .sqr()?
            .mul(&self.precisions)?
            .sum(1)?
            .reshape((self.num_senones, self.components))?;
        let ll = self.log_constants.sub(&distance)?;
        let max = ll.max_keepdim(1)?;
        let lse = ll
            .broadcast_sub(&max)?
            .exp()?
            .sum_keepdim(1)?
            .log()?
            .add(&max)?
            .squeeze(1)?;
        lse.affine(self.inverse_ln_base, 0.0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()
    }
}

impl FrameScorer for TensorSenoneScorer {
    fn score_frame(&self, features: &[f32]) -> AsrResult<Vec<f32>> {
        Ok(self.score_tensor(features)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::senone::GaussianMixture;
    use asr_core::LogMath;

    #[test]
    fn test_tensor_matches_scalar_scoring() {
        let a = GaussianMixture::new(&[1.0], vec![vec![0.0, 1.0]], vec![vec![1.0, 2.0]], 1e-4).unwrap();
        let b = GaussianMixture::new(
            &[0.3, 0.7],
            vec![vec![1.0, 0.0], vec![-1.0, 0.5]],
            vec![vec![0.5, 0.5], vec![1.0, 1.5]],
            1e-4,
        )
        .unwrap();
        let set = GaussianMixtureSet::new(vec![a, b], LogMath::default()).unwrap();
        let scorer = TensorSenoneScorer::from_mixtures(&set, &Device::Cpu).unwrap();

        let frame = [0.2f32, 0.4];
        let batched = scorer.score_frame(&frame).unwrap();
        let scalar = set.score_frame(&frame).unwrap();
        assert_eq!(batched.len(), 2);
        for (x, y) in batched.iter().zip(&scalar) {
            assert!((x - y).abs() / y.abs().max(1.0) < 1e-3, "{x} vs {y}");
        }
    }

    #[test]
    fn test_tensor_dimension_mismatch() {
        let a = GaussianMixture::new(&[1.0], vec![vec![0.0]], vec![vec![1.0]], 1e-4).unwrap();
        let set = GaussianMixtureSet::new(vec![a], LogMath::default()).unwrap();
        let scorer = TensorSenoneScorer::from_mixtures(&set, &Device::Cpu).unwrap();
        assert!(scorer.score_frame(&[0.0, 1.0]).is_err());
    }
}
