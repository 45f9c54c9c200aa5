//! Фонетические юниты и их пул.
//!
//! Контекстно-независимые (CI) юниты регистрируются первыми и получают
//! плотные идентификаторы `0..num_ci`. Контекстные юниты (трифоны)
//! пулируются по тройке `(base, left, right)`: одинаковые тройки всегда
//! дают один и тот же [`UnitId`].

use std::collections::HashMap;
use std::fmt;

use asr_core::{AsrError, AsrResult};
use serde::{Deserialize, Serialize};

/// Имя юнита тишины.
pub const SILENCE_NAME: &str = "SIL";

/// Идентификатор юнита внутри [`UnitManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u32);

impl UnitId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Левый и правый контекст юнита.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitContext {
    pub left: UnitId,
    pub right: UnitId,
}

/// Акустический юнит: базовая фонема, возможно, в контексте.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    /// CI-юнит, лежащий в основе (для CI-юнита — он сам).
    pub base: UnitId,
    pub filler: bool,
    pub silence: bool,
    pub context: Option<UnitContext>,
}

impl Unit {
    /// Контекстно-независимый ли юнит.
    pub fn is_context_independent(&self) -> bool {
        self.context.is_none()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Пул юнитов модели.
#[derive(Debug, Clone, Default)]
pub struct UnitManager {
    units: Vec<Unit>,
    by_name: HashMap<String, UnitId>,
    by_context: HashMap<(UnitId, UnitId, UnitId), UnitId>,
    num_ci: usize,
}

impl UnitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарегистрировать CI-юнит. Повторная регистрация возвращает тот же id.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Model`, если контекстные юниты уже созданы: CI-юниты
    /// должны занимать плотный диапазон идентификаторов.
    pub fn add_ci_unit(&mut self, name: &str, filler: bool) -> AsrResult<UnitId> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        if self.units.len() != self.num_ci {
            return Err(AsrError::Model(format!(
                "CI-юнит {name} добавлен после контекстных юнитов"
            )));
        }
        let id = UnitId(self.units.len() as u32);
        let silence = name == SILENCE_NAME;
        self.units.push(Unit {
            id,
            name: name.to_string(),
            base: id,
            filler: filler || silence,
            silence,
            context: None,
        });
        self.by_name.insert(name.to_string(), id);
        self.num_ci += 1;
        Ok(id)
    }

    /// Получить (или создать) контекстный юнит `base(left, right)`.
    ///
    /// Филлеры контекст не учитывают: возвращается сам CI-юнит.
    pub fn context_unit(&mut self, base: UnitId, left: UnitId, right: UnitId) -> AsrResult<UnitId> {
        for id in [base, left, right] {
            self.ci(id)?;
        }
        if self.units[base.index()].filler {
            return Ok(base);
        }
        if let Some(&id) = self.by_context.get(&(base, left, right)) {
            return Ok(id);
        }
        let id = UnitId(self.units.len() as u32);
        let name = format!(
            "{}({},{})",
            self.units[base.index()].name,
            self.units[left.index()].name,
            self.units[right.index()].name
        );
        self.units.push(Unit {
            id,
            name,
            base,
            filler: false,
            silence: false,
            context: Some(UnitContext { left, right }),
        });
        self.by_context.insert((base, left, right), id);
        Ok(id)
    }

    /// Найти уже существующий контекстный юнит.
    pub fn find_context_unit(&self, base: UnitId, left: UnitId, right: UnitId) -> Option<UnitId> {
        if self.get(base)?.filler {
            return Some(base);
        }
        self.by_context.get(&(base, left, right)).copied()
    }

    fn ci(&self, id: UnitId) -> AsrResult<&Unit> {
        match self.units.get(id.index()) {
            Some(unit) if unit.is_context_independent() => Ok(unit),
            _ => Err(AsrError::Model(format!("{id:?} не является CI-юнитом"))),
        }
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id.index())
    }

    /// CI-юнит по имени.
    pub fn ci_unit(&self, name: &str) -> Option<UnitId> {
        self.by_name.get(name).copied()
    }

    /// Имя юнита (для логов).
    pub fn name(&self, id: UnitId) -> &str {
        self.get(id).map(|u| u.name.as_str()).unwrap_or("?")
    }

    pub fn num_ci_units(&self) -> usize {
        self.num_ci
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Все CI-юниты в порядке регистрации.
    pub fn ci_units(&self) -> impl Iterator<Item = &Unit> {
        self.units[..self.num_ci].iter()
    }

    /// Юнит тишины, если он зарегистрирован.
    pub fn silence(&self) -> Option<UnitId> {
        self.ci_unit(SILENCE_NAME)
    }

    pub fn is_filler(&self, id: UnitId) -> bool {
        self.get(id).is_some_and(|u| u.filler)
    }

    pub fn is_silence(&self, id: UnitId) -> bool {
        self.get(id).is_some_and(|u| u.silence)
    }

    /// Базовый CI-юнит.
    pub fn base(&self, id: UnitId) -> UnitId {
        self.get(id).map(|u| u.base).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_units_are_pooled() {
        let mut units = UnitManager::new();
        let k = units.add_ci_unit("K", false).unwrap();
        let ae = units.add_ci_unit("AE", false).unwrap();
        let t = units.add_ci_unit("T", false).unwrap();
        let a = units.context_unit(ae, k, t).unwrap();
        let b = units.context_unit(ae, k, t).unwrap();
        assert_eq!(a, b);
        assert_eq!(units.name(a), "AE(K,T)");
        assert_eq!(units.base(a), ae);
        assert_ne!(a, units.context_unit(ae, t, k).unwrap());
    }

    #[test]
    fn test_filler_ignores_context() {
        let mut units = UnitManager::new();
        let sil = units.add_ci_unit(SILENCE_NAME, false).unwrap();
        let k = units.add_ci_unit("K", false).unwrap();
        assert!(units.is_silence(sil));
        assert!(units.is_filler(sil));
        assert_eq!(units.context_unit(sil, k, k).unwrap(), sil);
        assert_eq!(units.silence(), Some(sil));
    }

    #[test]
    fn test_ci_units_must_come_first() {
        let mut units = UnitManager::new();
        let k = units.add_ci_unit("K", false).unwrap();
        units.context_unit(k, k, k).unwrap();
        assert!(units.add_ci_unit("T", false).is_err());
        // Повторная регистрация существующего имени допустима.
        assert_eq!(units.add_ci_unit("K", false).unwrap(), k);
        assert_eq!(units.num_ci_units(), 1);
    }
}
