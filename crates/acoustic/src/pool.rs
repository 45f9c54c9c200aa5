//! Пул контекстных HMM.
//!
//! Плотная таблица `(позиция, base, left, right) -> HMM`, заполняемая один
//! раз при построении через [`AcousticModel::lookup_nearest_hmm`]. Филлеры
//! контекст не учитывают. Пул принадлежит фазе компиляции дерева и
//! передаётся по ссылке: глобального состояния нет.

use std::sync::Arc;

use asr_core::{AsrError, AsrResult};
use tracing::{debug, info};

use crate::hmm::{Hmm, HmmPosition};
use crate::model::AcousticModel;
use crate::unit::{UnitId, UnitManager};

/// Таблица HMM по контексту.
pub struct HmmPool {
    model: Arc<dyn AcousticModel>,
    num_ci: usize,
    table: Vec<Option<Arc<Hmm>>>,
}

impl std::fmt::Debug for HmmPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmmPool")
            .field("model", &self.model.name())
            .field("num_ci", &self.num_ci)
            .field("entries", &self.table.len())
            .finish()
    }
}

impl HmmPool {
    /// Построить таблицу для всех CI-троек и позиций.
    pub fn new(model: Arc<dyn AcousticModel>) -> AsrResult<Self> {
        let num_ci = model.units().num_ci_units();
        if num_ci == 0 {
            return Err(AsrError::Model(format!(
                "модель {} не содержит CI-юнитов",
                model.name()
            )));
        }
        let positions = HmmPosition::POOLED.len();
        let mut table = vec![None; positions * num_ci * num_ci * num_ci];
        let mut missing = 0usize;
        for (p, &position) in HmmPosition::POOLED.iter().enumerate() {
            for base in 0..num_ci {
                for left in 0..num_ci {
                    for right in 0..num_ci {
                        let hmm = model.lookup_nearest_hmm(
                            UnitId(base as u32),
                            UnitId(left as u32),
                            UnitId(right as u32),
                            position,
                        );
                        if hmm.is_none() {
                            missing += 1;
                        }
                        table[Self::index_of(num_ci, p, base, left, right)] = hmm;
                    }
                }
            }
        }
        if missing > 0 {
            debug!("HmmPool: {missing} комбинаций контекста без HMM");
        }
        info!(
            "HmmPool: {} CI-юнитов, {} записей",
            num_ci,
            table.len() - missing
        );
        Ok(Self {
            model,
            num_ci,
            table,
        })
    }

    fn index_of(num_ci: usize, position: usize, base: usize, left: usize, right: usize) -> usize {
        ((position * num_ci + base) * num_ci + left) * num_ci + right
    }

    fn position_index(position: HmmPosition) -> Option<usize> {
        HmmPosition::POOLED.iter().position(|p| *p == position)
    }

    pub fn model(&self) -> &Arc<dyn AcousticModel> {
        &self.model
    }

    pub fn units(&self) -> &UnitManager {
        self.model.units()
    }

    /// HMM для `base(left, right)` в позиции.
    ///
    /// # Ошибки
    ///
    /// `AsrError::MissingHmm`, если для тройки нет ни точной, ни
    /// приближённой модели.
    pub fn get_hmm(
        &self,
        base: UnitId,
        left: UnitId,
        right: UnitId,
        position: HmmPosition,
    ) -> AsrResult<Arc<Hmm>> {
        let found = Self::position_index(position).and_then(|p| {
            let in_range = [base, left, right].iter().all(|u| u.index() < self.num_ci);
            if !in_range {
                return None;
            }
            self.table[Self::index_of(
                self.num_ci,
                p,
                base.index(),
                left.index(),
                right.index(),
            )]
            .clone()
        });
        found.ok_or_else(|| {
            let units = self.units();
            AsrError::MissingHmm(format!(
                "{}({},{}) в позиции {position:?}",
                units.name(base),
                units.name(left),
                units.name(right)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::{SenoneId, left_to_right};
    use crate::model::TiedStateModel;

    #[test]
    fn test_pool_lookup_and_missing() {
        let mut b = TiedStateModel::builder("pool");
        let sil = b.ci_unit("SIL", true).unwrap();
        let k = b.ci_unit("K", false).unwrap();
        let zh = b.ci_unit("ZH", false).unwrap();
        b.add_hmm(sil, HmmPosition::Undefined, vec![SenoneId(0)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        let k_sil = b.context_unit(k, sil, sil).unwrap();
        b.add_hmm(k_sil, HmmPosition::Single, vec![SenoneId(1)], left_to_right(1, -0.1, -2.3))
            .unwrap();
        let model: Arc<dyn AcousticModel> = Arc::new(b.build().unwrap());
        let pool = HmmPool::new(model).unwrap();

        let hmm = pool.get_hmm(k, sil, sil, HmmPosition::Single).unwrap();
        assert_eq!(hmm.senones(), &[SenoneId(1)]);
        // Филлер: контекст игнорируется.
        let s = pool.get_hmm(sil, k, zh, HmmPosition::Begin).unwrap();
        assert_eq!(s.senones(), &[SenoneId(0)]);
        // ZH вообще без модели.
        let err = pool.get_hmm(zh, sil, sil, HmmPosition::Internal).unwrap_err();
        assert!(matches!(err, AsrError::MissingHmm(_)));
        // Позиция вне таблицы.
        assert!(pool.get_hmm(k, sil, sil, HmmPosition::Undefined).is_err());
    }
}
