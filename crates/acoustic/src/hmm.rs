//! HMM одного юнита в одной позиции слова.

use std::fmt;

use asr_core::{AsrError, AsrResult, LOG_ZERO};
use serde::{Deserialize, Serialize};

use crate::unit::UnitId;

/// Позиция юнита в слове.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HmmPosition {
    Begin,
    Internal,
    End,
    Single,
    Undefined,
}

impl HmmPosition {
    /// Все позиции в порядке перебора при поиске ближайшей HMM.
    pub const ALL: [HmmPosition; 5] = [
        HmmPosition::Begin,
        HmmPosition::Internal,
        HmmPosition::End,
        HmmPosition::Single,
        HmmPosition::Undefined,
    ];

    /// Позиции, для которых строится таблица пула.
    pub const POOLED: [HmmPosition; 4] = [
        HmmPosition::Begin,
        HmmPosition::Internal,
        HmmPosition::End,
        HmmPosition::Single,
    ];

    /// Начинает ли юнит в этой позиции слово.
    pub fn is_word_beginning(self) -> bool {
        matches!(self, HmmPosition::Begin | HmmPosition::Single)
    }
}

/// Идентификатор HMM внутри модели.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HmmId(pub u32);

/// Идентификатор сенона (распределения выхода эмитирующего состояния).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenoneId(pub u32);

impl SenoneId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// HMM: матрица переходов и список эмитирующих состояний.
///
/// Матрица имеет `n` строк (эмитирующие состояния) и `n + 1` столбцов:
/// последний столбец — неэмитирующее выходное состояние. Переходы назад
/// запрещены (`LOG_ZERO` ниже диагонали).
#[derive(Debug, Clone, PartialEq)]
pub struct Hmm {
    pub id: HmmId,
    /// Юнит в контексте.
    pub unit: UnitId,
    /// Базовый CI-юнит.
    pub base: UnitId,
    pub position: HmmPosition,
    senones: Vec<SenoneId>,
    transitions: Vec<Vec<f32>>,
}

impl Hmm {
    /// Создать HMM с проверкой топологии.
    pub fn new(
        id: HmmId,
        unit: UnitId,
        base: UnitId,
        position: HmmPosition,
        senones: Vec<SenoneId>,
        transitions: Vec<Vec<f32>>,
    ) -> AsrResult<Self> {
        let n = senones.len();
        if n == 0 {
            return Err(AsrError::Model(format!("HMM {id:?} без эмитирующих состояний")));
        }
        if transitions.len() != n || transitions.iter().any(|row| row.len() != n + 1) {
            return Err(AsrError::Model(format!(
                "HMM {id:?}: матрица переходов должна быть {n}x{}",
                n + 1
            )));
        }
        for (i, row) in transitions.iter().enumerate() {
            if row[..i].iter().any(|&p| p > LOG_ZERO) {
                return Err(AsrError::Model(format!(
                    "HMM {id:?}: переход назад из состояния {i}"
                )));
            }
            if row.iter().any(|p| p.is_nan() || *p > 0.0) {
                return Err(AsrError::Model(format!(
                    "HMM {id:?}: недопустимая лог-вероятность в строке {i}"
                )));
            }
        }
        Ok(Self {
            id,
            unit,
            base,
            position,
            senones,
            transitions,
        })
    }

    /// Число эмитирующих состояний.
    pub fn num_states(&self) -> usize {
        self.senones.len()
    }

    pub fn senone(&self, state: usize) -> Option<SenoneId> {
        self.senones.get(state).copied()
    }

    pub fn senones(&self) -> &[SenoneId] {
        &self.senones
    }

    /// Лог-вероятность перехода `from -> to` (`to == num_states()` — выход).
    pub fn transition(&self, from: usize, to: usize) -> f32 {
        self.transitions
            .get(from)
            .and_then(|row| row.get(to))
            .copied()
            .unwrap_or(LOG_ZERO)
    }

    /// Разрешённые переходы из состояния: `(куда, лог-вероятность)`.
    pub fn arcs_from(&self, from: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.transitions
            .get(from)
            .into_iter()
            .flat_map(|row| row.iter().copied().enumerate())
            .filter(|&(_, p)| p > LOG_ZERO)
    }

    /// Является ли индекс выходным состоянием.
    pub fn is_exit(&self, state: usize) -> bool {
        state == self.num_states()
    }
}

impl fmt::Display for Hmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HMM#{}({:?})", self.id.0, self.position)
    }
}

/// Матрица лево-правой топологии Бакиса: петля и шаг вперёд.
///
/// `self_loop` и `forward` — лог-вероятности; последнее состояние
/// переходит в выход с вероятностью `forward`.
pub fn left_to_right(num_states: usize, self_loop: f32, forward: f32) -> Vec<Vec<f32>> {
    (0..num_states)
        .map(|i| {
            let mut row = vec![LOG_ZERO; num_states + 1];
            row[i] = self_loop;
            row[i + 1] = forward;
            row
        })
        .collect()
}
