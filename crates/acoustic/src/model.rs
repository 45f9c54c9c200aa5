//! Акустическая модель: инвентарь юнитов и HMM.
//!
//! Трейт [`AcousticModel`] — то, что нужно компилятору лексического
//! дерева и пулу HMM. [`TiedStateModel`] — реализация в памяти,
//! собираемая программно ([`TiedStateModelBuilder`]) или из JSON-описания
//! ([`ModelDefinition`]).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use asr_core::{AsrError, AsrResult, LogMath};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hmm::{Hmm, HmmId, HmmPosition, SenoneId};
use crate::senone::{DEFAULT_VARIANCE_FLOOR, GaussianMixture, GaussianMixtureSet};
use crate::unit::{UnitId, UnitManager};

/// Интерфейс акустической модели.
pub trait AcousticModel: Send + Sync {
    /// Имя модели (для логов).
    fn name(&self) -> &str;

    /// Пул юнитов модели.
    fn units(&self) -> &UnitManager;

    /// Точное совпадение: HMM для юнита `unit` (CI или в контексте) в позиции.
    fn lookup_hmm(&self, unit: UnitId, position: HmmPosition) -> Option<Arc<Hmm>>;

    /// Число сенонов, на которые ссылаются HMM.
    fn num_senones(&self) -> usize;

    /// Ближайшая доступная HMM для `base(left, right)` в позиции.
    ///
    /// Порядок: точное совпадение, та же тройка в любой позиции, тройка с
    /// филлерами в контексте, заменёнными на тишину, CI-юнит в позиции,
    /// CI-юнит в любой позиции.
    fn lookup_nearest_hmm(
        &self,
        base: UnitId,
        left: UnitId,
        right: UnitId,
        position: HmmPosition,
    ) -> Option<Arc<Hmm>> {
        let units = self.units();
        let in_context = |l: UnitId, r: UnitId| -> Option<Arc<Hmm>> {
            let unit = units.find_context_unit(base, l, r)?;
            self.lookup_hmm(unit, position).or_else(|| {
                HmmPosition::ALL
                    .iter()
                    .find_map(|&p| self.lookup_hmm(unit, p))
            })
        };

        if let Some(hmm) = in_context(left, right) {
            return Some(hmm);
        }
        if let Some(silence) = units.silence() {
            let swap = |u: UnitId| {
                if units.is_filler(u) && !units.is_silence(u) { silence } else { u }
            };
            let (l, r) = (swap(left), swap(right));
            if (l, r) != (left, right) {
                if let Some(hmm) = in_context(l, r) {
                    return Some(hmm);
                }
            }
        }
        self.lookup_hmm(base, position).or_else(|| {
            HmmPosition::ALL
                .iter()
                .find_map(|&p| self.lookup_hmm(base, p))
        })
    }
}

// ---------------------------------------------------------------------------
// Модель в памяти
// ---------------------------------------------------------------------------

/// Модель со связанными состояниями, хранящаяся в памяти.
#[derive(Debug, Clone)]
pub struct TiedStateModel {
    name: String,
    units: UnitManager,
    hmms: Vec<Arc<Hmm>>,
    by_unit: HashMap<(UnitId, HmmPosition), HmmId>,
    senones: Option<GaussianMixtureSet>,
    num_senones: usize,
}

impl TiedStateModel {
    pub fn builder(name: impl Into<String>) -> TiedStateModelBuilder {
        TiedStateModelBuilder {
            name: name.into(),
            units: UnitManager::new(),
            hmms: Vec::new(),
            by_unit: HashMap::new(),
            senones: None,
        }
    }

    /// Все HMM модели.
    pub fn hmms(&self) -> &[Arc<Hmm>] {
        &self.hmms
    }

    /// Смеси гауссиан сенонов, если модель их содержит.
    pub fn senones(&self) -> Option<&GaussianMixtureSet> {
        self.senones.as_ref()
    }

    /// Загрузить модель из JSON-описания.
    pub fn from_json_file(path: impl AsRef<Path>, log_math: &LogMath) -> AsrResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AsrError::Model(format!("не удалось прочитать модель {}: {e}", path.display()))
        })?;
        let definition: ModelDefinition = serde_json::from_str(&text)?;
        Self::from_definition(&definition, log_math)
    }

    /// Собрать модель из описания; переходы задаются линейными вероятностями.
    pub fn from_definition(definition: &ModelDefinition, log_math: &LogMath) -> AsrResult<Self> {
        let mut builder = Self::builder(definition.name.clone());
        for unit in &definition.units {
            builder.ci_unit(&unit.name, unit.filler)?;
        }

        for hmm in &definition.hmms {
            let lookup = |name: &str| -> AsrResult<UnitId> {
                builder
                    .units()
                    .ci_unit(name)
                    .ok_or_else(|| AsrError::Model(format!("неизвестный юнит {name}")))
            };
            let base = lookup(&hmm.base)?;
            let unit = match (&hmm.left, &hmm.right) {
                (Some(left), Some(right)) => {
                    let (l, r) = (lookup(left)?, lookup(right)?);
                    builder.context_unit(base, l, r)?
                }
                (None, None) => base,
                _ => {
                    return Err(AsrError::Model(format!(
                        "HMM {}: контекст должен быть задан с обеих сторон",
                        hmm.base
                    )));
                }
            };
            let transitions = hmm
                .transitions
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|p| log_math.linear_to_log(*p as f64))
                        .collect::<AsrResult<Vec<f32>>>()
                })
                .collect::<AsrResult<Vec<_>>>()?;
            let senones = hmm.senones.iter().copied().map(SenoneId).collect();
            builder.add_hmm(unit, hmm.position, senones, transitions)?;
        }

        if let Some(senones) = &definition.senones {
            let mixtures = senones
                .iter()
                .map(|s| {
                    GaussianMixture::new(
                        &s.weights,
                        s.means.clone(),
                        s.variances.clone(),
                        definition.variance_floor.unwrap_or(DEFAULT_VARIANCE_FLOOR),
                    )
                })
                .collect::<AsrResult<Vec<_>>>()?;
            builder.with_senones(GaussianMixtureSet::new(mixtures, log_math.clone())?);
        }
        builder.build()
    }
}

impl AcousticModel for TiedStateModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn units(&self) -> &UnitManager {
        &self.units
    }

    fn lookup_hmm(&self, unit: UnitId, position: HmmPosition) -> Option<Arc<Hmm>> {
        let id = self.by_unit.get(&(unit, position))?;
        self.hmms.get(id.0 as usize).cloned()
    }

    fn num_senones(&self) -> usize {
        self.num_senones
    }
}

/// Сборщик [`TiedStateModel`].
#[derive(Debug)]
pub struct TiedStateModelBuilder {
    name: String,
    units: UnitManager,
    hmms: Vec<Arc<Hmm>>,
    by_unit: HashMap<(UnitId, HmmPosition), HmmId>,
    senones: Option<GaussianMixtureSet>,
}

impl TiedStateModelBuilder {
    pub fn units(&self) -> &UnitManager {
        &self.units
    }

    /// Зарегистрировать CI-юнит.
    pub fn ci_unit(&mut self, name: &str, filler: bool) -> AsrResult<UnitId> {
        self.units.add_ci_unit(name, filler)
    }

    /// Контекстный юнит из пула.
    pub fn context_unit(&mut self, base: UnitId, left: UnitId, right: UnitId) -> AsrResult<UnitId> {
        self.units.context_unit(base, left, right)
    }

    /// Добавить HMM для юнита в позиции.
    pub fn add_hmm(
        &mut self,
        unit: UnitId,
        position: HmmPosition,
        senones: Vec<SenoneId>,
        transitions: Vec<Vec<f32>>,
    ) -> AsrResult<HmmId> {
        if self.by_unit.contains_key(&(unit, position)) {
            return Err(AsrError::Model(format!(
                "HMM для {} в позиции {position:?} уже задана",
                self.units.name(unit)
            )));
        }
        let base = self.units.base(unit);
        let id = HmmId(self.hmms.len() as u32);
        let hmm = Hmm::new(id, unit, base, position, senones, transitions)?;
        self.hmms.push(Arc::new(hmm));
        self.by_unit.insert((unit, position), id);
        Ok(id)
    }

    pub fn with_senones(&mut self, senones: GaussianMixtureSet) -> &mut Self {
        self.senones = Some(senones);
        self
    }

    /// Проверить ссылки на сеноны и собрать модель.
    pub fn build(self) -> AsrResult<TiedStateModel> {
        let max_senone = self
            .hmms
            .iter()
            .flat_map(|h| h.senones().iter().map(|s| s.index() + 1))
            .max()
            .unwrap_or(0);
        let num_senones = match &self.senones {
            Some(set) => {
                let n = set.mixtures().len();
                if max_senone > n {
                    return Err(AsrError::Model(format!(
                        "HMM ссылаются на сенон {}, а в модели их {n}",
                        max_senone - 1
                    )));
                }
                n
            }
            None => max_senone,
        };
        info!(
            "Акустическая модель {}: {} CI-юнитов, {} HMM, {} сенонов",
            self.name,
            self.units.num_ci_units(),
            self.hmms.len(),
            num_senones
        );
        Ok(TiedStateModel {
            name: self.name,
            units: self.units,
            hmms: self.hmms,
            by_unit: self.by_unit,
            senones: self.senones,
            num_senones,
        })
    }
}

// ---------------------------------------------------------------------------
// JSON-описание
// ---------------------------------------------------------------------------

/// Описание модели для загрузки из JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    pub units: Vec<UnitDefinition>,
    pub hmms: Vec<HmmDefinition>,
    #[serde(default)]
    pub senones: Option<Vec<MixtureDefinition>>,
    #[serde(default)]
    pub variance_floor: Option<f32>,
}

/// CI-юнит.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub name: String,
    #[serde(default)]
    pub filler: bool,
}

/// HMM: контекст опционален (оба или ни одного).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmDefinition {
    pub base: String,
    #[serde(default)]
    pub left: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
    pub position: HmmPosition,
    pub senones: Vec<u32>,
    /// Линейные вероятности, `n x (n + 1)`.
    pub transitions: Vec<Vec<f32>>,
}

/// Смесь гауссиан одного сенона.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureDefinition {
    pub weights: Vec<f32>,
    pub means: Vec<Vec<f32>>,
    pub variances: Vec<Vec<f32>>,
}

/// Переходы `left_to_right` с линейными вероятностями петли.
pub fn linear_left_to_right(num_states: usize, self_loop: f32) -> Vec<Vec<f32>> {
    (0..num_states)
        .map(|i| {
            let mut row = vec![0.0; num_states + 1];
            row[i] = self_loop;
            row[i + 1] = 1.0 - self_loop;
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::left_to_right;
    use asr_core::LOG_ZERO;

    fn small_model() -> TiedStateModel {
        let mut b = TiedStateModel::builder("test");
        let sil = b.ci_unit("SIL", true).unwrap();
        let k = b.ci_unit("K", false).unwrap();
        let ae = b.ci_unit("AE", false).unwrap();
        b.ci_unit("+NOISE+", true).unwrap();
        b.add_hmm(sil, HmmPosition::Undefined, vec![SenoneId(0)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        b.add_hmm(k, HmmPosition::Undefined, vec![SenoneId(1)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        b.add_hmm(ae, HmmPosition::Undefined, vec![SenoneId(2)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        let ae_k_sil = b.context_unit(ae, k, sil).unwrap();
        b.add_hmm(ae_k_sil, HmmPosition::End, vec![SenoneId(3)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_exact_and_nearest_lookup() {
        let model = small_model();
        let units = model.units();
        let (sil, k, ae) = (
            units.ci_unit("SIL").unwrap(),
            units.ci_unit("K").unwrap(),
            units.ci_unit("AE").unwrap(),
        );
        let exact = model.lookup_nearest_hmm(ae, k, sil, HmmPosition::End).unwrap();
        assert_eq!(exact.senones(), &[SenoneId(3)]);

        // Та же тройка в другой позиции.
        let any_pos = model.lookup_nearest_hmm(ae, k, sil, HmmPosition::Internal).unwrap();
        assert_eq!(any_pos.id, exact.id);

        // Нет трифона: откат к CI.
        let ci = model.lookup_nearest_hmm(ae, sil, k, HmmPosition::Begin).unwrap();
        assert_eq!(ci.senones(), &[SenoneId(2)]);
        assert_eq!(model.num_senones(), 4);
    }

    #[test]
    fn test_non_silence_filler_context_maps_to_silence() {
        let model = small_model();
        let units = model.units();
        let (k, ae, noise) = (
            units.ci_unit("K").unwrap(),
            units.ci_unit("AE").unwrap(),
            units.ci_unit("+NOISE+").unwrap(),
        );
        let hmm = model.lookup_nearest_hmm(ae, k, noise, HmmPosition::End).unwrap();
        assert_eq!(hmm.senones(), &[SenoneId(3)]);
    }

    #[test]
    fn test_duplicate_hmm_rejected() {
        let mut b = TiedStateModel::builder("dup");
        let k = b.ci_unit("K", false).unwrap();
        b.add_hmm(k, HmmPosition::Begin, vec![SenoneId(0)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        assert!(
            b.add_hmm(k, HmmPosition::Begin, vec![SenoneId(0)], left_to_right(1, -0.1, -2.3))
                .is_err()
        );
    }

    #[test]
    fn test_from_definition_json() {
        let json = r#"{
            "name": "tiny",
            "units": [{"name": "SIL", "filler": true}, {"name": "AH"}],
            "hmms": [
                {"base": "SIL", "position": "undefined", "senones": [0], "transitions": [[0.5, 0.5]]},
                {"base": "AH", "left": "SIL", "right": "SIL", "position": "single",
                 "senones": [1, 1], "transitions": [[0.6, 0.4, 0.0], [0.0, 0.7, 0.3]]}
            ],
            "senones": [
                {"weights": [1.0], "means": [[0.0]], "variances": [[1.0]]},
                {"weights": [1.0], "means": [[1.0]], "variances": [[1.0]]}
            ]
        }"#;
        let definition: ModelDefinition = serde_json::from_str(json).unwrap();
        let model = TiedStateModel::from_definition(&definition, &LogMath::natural()).unwrap();
        assert_eq!(model.hmms().len(), 2);
        assert_eq!(model.num_senones(), 2);
        let ah = &model.hmms()[1];
        assert_eq!(ah.transition(1, 0), LOG_ZERO);
        assert!((ah.transition(0, 0) - 0.6f32.ln()).abs() < 1e-5);
        assert!(model.senones().is_some());
        assert_eq!(ah.arcs_from(0).count(), 2);
    }

    #[test]
    fn test_linear_left_to_right_rows_sum_to_one() {
        for row in linear_left_to_right(3, 0.6) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
    }
}
