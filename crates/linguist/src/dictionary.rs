//! Словарь произношений.
//!
//! Формат текстового словаря (CMU):
//!
//! ```text
//! HELLO      HH AH L OW
//! HELLO(2)   HH EH L OW
//! ```
//!
//! Филлеры задаются отдельным файлом в том же формате. Маркеры `<s>`,
//! `</s>` и `<sil>` добавляются автоматически как филлеры с юнитом `SIL`,
//! если модель его содержит.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use acoustic::{UnitId, UnitManager};
use asr_core::{AsrError, AsrResult};
use tracing::{info, warn};

/// Начало предложения.
pub const SENTENCE_START: &str = "<s>";
/// Конец предложения.
pub const SENTENCE_END: &str = "</s>";
/// Слово тишины.
pub const SILENCE_WORD: &str = "<sil>";

/// Слово словаря.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Word {
    spelling: String,
    filler: bool,
}

impl Word {
    pub fn new(spelling: impl Into<String>, filler: bool) -> Self {
        Self {
            spelling: spelling.into(),
            filler,
        }
    }

    pub fn spelling(&self) -> &str {
        &self.spelling
    }

    /// Филлер (включая тишину и маркеры предложения).
    pub fn is_filler(&self) -> bool {
        self.filler
    }

    pub fn is_sentence_start(&self) -> bool {
        self.spelling == SENTENCE_START
    }

    pub fn is_sentence_end(&self) -> bool {
        self.spelling == SENTENCE_END
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spelling)
    }
}

/// Идентификатор произношения внутри словаря.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PronunciationId(pub u32);

/// Произношение: последовательность CI-юнитов.
///
/// Равенство и хеш — по идентификатору.
#[derive(Debug, Clone)]
pub struct Pronunciation {
    id: PronunciationId,
    word: Arc<Word>,
    units: Box<[UnitId]>,
}

impl Pronunciation {
    pub fn new(id: PronunciationId, word: Arc<Word>, units: Vec<UnitId>) -> Self {
        Self {
            id,
            word,
            units: units.into_boxed_slice(),
        }
    }

    pub fn id(&self) -> PronunciationId {
        self.id
    }

    pub fn word(&self) -> &Word {
        &self.word
    }

    pub fn units(&self) -> &[UnitId] {
        &self.units
    }
}

impl PartialEq for Pronunciation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pronunciation {}

impl Hash for Pronunciation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone)]
struct Entry {
    word: Arc<Word>,
    pronunciations: Vec<Arc<Pronunciation>>,
}

/// Словарь: слово → произношения.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    next_id: u32,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить произношение слова.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Model` для пустого произношения или конфликта признака филлера.
    pub fn add_word(
        &mut self,
        spelling: &str,
        units: &[UnitId],
        filler: bool,
    ) -> AsrResult<Arc<Pronunciation>> {
        if units.is_empty() {
            return Err(AsrError::Model(format!("пустое произношение слова {spelling}")));
        }
        match self.entries.get(spelling) {
            Some(existing) if existing.word.is_filler() != filler => {
                return Err(AsrError::Model(format!(
                    "слово {spelling} одновременно филлер и обычное слово"
                )));
            }
            Some(_) => {}
            None => {
                self.order.push(spelling.to_string());
                self.entries.insert(
                    spelling.to_string(),
                    Entry {
                        word: Arc::new(Word::new(spelling, filler)),
                        pronunciations: Vec::new(),
                    },
                );
            }
        }
        let id = PronunciationId(self.next_id);
        let Some(entry) = self.entries.get_mut(spelling) else {
            return Err(AsrError::Model(format!("слово {spelling} не добавлено")));
        };
        let pronunciation = Arc::new(Pronunciation::new(id, entry.word.clone(), units.to_vec()));
        self.next_id += 1;
        entry.pronunciations.push(pronunciation.clone());
        Ok(pronunciation)
    }

    /// Добавить слово по именам CI-юнитов.
    pub fn add_word_by_names(
        &mut self,
        spelling: &str,
        unit_names: &[&str],
        units: &UnitManager,
        filler: bool,
    ) -> AsrResult<Arc<Pronunciation>> {
        let ids = unit_names
            .iter()
            .map(|name| {
                units.ci_unit(name).ok_or_else(|| {
                    AsrError::Model(format!("слово {spelling}: неизвестный юнит {name}"))
                })
            })
            .collect::<AsrResult<Vec<_>>>()?;
        self.add_word(spelling, &ids, filler)
    }

    /// Добавить `<s>`, `</s>`, `<sil>` с юнитом тишины (если их ещё нет).
    pub fn add_sentence_markers(&mut self, units: &UnitManager) -> AsrResult<()> {
        let silence = units
            .silence()
            .ok_or_else(|| AsrError::Model("модель не содержит юнита SIL".to_string()))?;
        for marker in [SENTENCE_START, SENTENCE_END, SILENCE_WORD] {
            if !self.entries.contains_key(marker) {
                self.add_word(marker, &[silence], true)?;
            }
        }
        Ok(())
    }

    /// Разобрать словарь и (опционально) словарь филлеров.
    pub fn from_text(text: &str, filler_text: Option<&str>, units: &UnitManager) -> AsrResult<Self> {
        let mut dictionary = Self::new();
        if let Some(fillers) = filler_text {
            dictionary.parse_into(fillers, units, true)?;
        }
        dictionary.parse_into(text, units, false)?;
        dictionary.add_sentence_markers(units)?;
        info!(
            "Словарь: {} слов, {} произношений",
            dictionary.len(),
            dictionary.next_id
        );
        Ok(dictionary)
    }

    /// Загрузить словарь из файлов.
    pub fn from_files(
        path: impl AsRef<Path>,
        filler_path: Option<&Path>,
        units: &UnitManager,
    ) -> AsrResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let fillers = filler_path.map(std::fs::read_to_string).transpose()?;
        Self::from_text(&text, fillers.as_deref(), units)
    }

    fn parse_into(&mut self, text: &str, units: &UnitManager, filler: bool) -> AsrResult<()> {
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(";;") {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(raw) = fields.next() else { continue };
            let spelling = strip_variant(raw);
            let phones: Vec<&str> = fields.collect();
            if phones.is_empty() {
                warn!("Словарь, строка {}: слово {} без произношения", line_no + 1, raw);
                continue;
            }
            self.add_word_by_names(spelling, &phones, units, filler)?;
        }
        Ok(())
    }

    pub fn word(&self, spelling: &str) -> Option<&Arc<Word>> {
        self.entries.get(spelling).map(|e| &e.word)
    }

    pub fn pronunciations(&self, spelling: &str) -> &[Arc<Pronunciation>] {
        self.entries
            .get(spelling)
            .map(|e| e.pronunciations.as_slice())
            .unwrap_or(&[])
    }

    /// Все слова в порядке добавления.
    pub fn words(&self) -> impl Iterator<Item = &Arc<Word>> {
        self.order.iter().filter_map(|s| self.entries.get(s).map(|e| &e.word))
    }

    /// Все филлеры в порядке добавления.
    pub fn filler_words(&self) -> impl Iterator<Item = &Arc<Word>> {
        self.words().filter(|w| w.is_filler())
    }

    pub fn contains(&self, spelling: &str) -> bool {
        self.entries.contains_key(spelling)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// `WORD(2)` → `WORD`.
fn strip_variant(raw: &str) -> &str {
    match raw.rfind('(') {
        Some(pos) if raw.ends_with(')') && pos > 0 => &raw[..pos],
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> UnitManager {
        let mut units = UnitManager::new();
        for name in ["SIL", "HH", "AH", "EH", "L", "OW"] {
            units.add_ci_unit(name, false).unwrap();
        }
        units.add_ci_unit("+BREATH+", true).unwrap();
        units
    }

    #[test]
    fn test_parse_with_variants() {
        let units = units();
        let text = "# comment\nHELLO HH AH L OW\nHELLO(2) HH EH L OW\n";
        let fillers = "+BREATH+ +BREATH+\n";
        let dict = Dictionary::from_text(text, Some(fillers), &units).unwrap();
        assert_eq!(dict.pronunciations("HELLO").len(), 2);
        assert!(dict.word("+BREATH+").unwrap().is_filler());
        assert!(dict.word(SENTENCE_START).unwrap().is_filler());
        assert!(dict.contains(SILENCE_WORD));
        let ids: Vec<_> = dict.pronunciations("HELLO").iter().map(|p| p.id()).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_unknown_unit_is_error() {
        let units = units();
        let err = Dictionary::from_text("BAD ZZ\n", None, &units).unwrap_err();
        assert!(matches!(err, AsrError::Model(_)));
    }

    #[test]
    fn test_strip_variant() {
        assert_eq!(strip_variant("READ(2)"), "READ");
        assert_eq!(strip_variant("(paren"), "(paren");
        assert_eq!(strip_variant("WORD"), "WORD");
    }

    #[test]
    fn test_pronunciation_identity() {
        let mut dict = Dictionary::new();
        let a = dict.add_word("A", &[UnitId(1)], false).unwrap();
        let b = dict.add_word("B", &[UnitId(1)], false).unwrap();
        assert_ne!(*a, *b);
        assert_eq!(a.units(), b.units());
        assert!(dict.add_word("A", &[UnitId(2)], true).is_err());
        assert!(dict.add_word("C", &[], false).is_err());
    }
}
