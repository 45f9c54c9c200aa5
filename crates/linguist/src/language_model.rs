//! Униграммная языковая модель.
//!
//! Лексическое дереву нужны только униграммы: каждое слово получает
//! лог-вероятность в основании декодера. Чтение ARPA ограничено секцией
//! `\1-grams:`; логарифмы по основанию 10 переводятся через [`LogMath`].

use std::collections::HashMap;
use std::path::Path;

use asr_core::{AsrError, AsrResult, LogMath};
use tracing::{info, warn};

/// Источник униграммных вероятностей.
pub trait LanguageModel: Send + Sync {
    /// Словарь модели в детерминированном порядке.
    fn vocabulary(&self) -> Vec<&str>;

    /// Лог-вероятность слова (основание декодера) или `None`.
    fn unigram(&self, word: &str) -> Option<f32>;
}

/// Таблица униграмм.
#[derive(Debug, Clone, Default)]
pub struct UnigramModel {
    words: Vec<(String, f32)>,
    index: HashMap<String, usize>,
}

impl UnigramModel {
    /// Модель из готовых лог-вероятностей.
    pub fn from_log_probabilities<S: Into<String>>(entries: impl IntoIterator<Item = (S, f32)>) -> Self {
        let mut model = Self::default();
        for (word, log_prob) in entries {
            model.insert(word.into(), log_prob);
        }
        model
    }

    /// Равновероятная модель над списком слов.
    pub fn uniform<S: Into<String>>(words: impl IntoIterator<Item = S>, log_math: &LogMath) -> AsrResult<Self> {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        if words.is_empty() {
            return Err(AsrError::Model("пустой словарь LM".to_string()));
        }
        let log_prob = log_math.linear_to_log(1.0 / words.len() as f64)?;
        Ok(Self::from_log_probabilities(words.into_iter().map(|w| (w, log_prob))))
    }

    /// Разобрать секцию `\1-grams:` ARPA-файла.
    pub fn from_arpa_str(text: &str, log_math: &LogMath) -> AsrResult<Self> {
        let mut model = Self::default();
        let mut in_unigrams = false;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.starts_with('\\') {
                if in_unigrams {
                    break;
                }
                in_unigrams = line == "\\1-grams:";
                continue;
            }
            if !in_unigrams || line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(prob), Some(word)) = (fields.next(), fields.next()) else {
                warn!("ARPA, строка {}: некорректная униграмма", line_no + 1);
                continue;
            };
            let log10: f32 = prob.parse().map_err(|_| {
                AsrError::Model(format!("ARPA, строка {}: не число {prob}", line_no + 1))
            })?;
            model.insert(word.to_string(), log_math.log10_to_log(log10));
        }
        if model.words.is_empty() {
            return Err(AsrError::Model("ARPA: секция \\1-grams: пуста или отсутствует".to_string()));
        }
        info!("Униграммная LM: {} слов", model.words.len());
        Ok(model)
    }

    /// Загрузить ARPA-файл.
    pub fn from_arpa_file(path: impl AsRef<Path>, log_math: &LogMath) -> AsrResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_arpa_str(&text, log_math)
    }

    fn insert(&mut self, word: String, log_prob: f32) {
        match self.index.get(&word) {
            Some(&i) => self.words[i].1 = log_prob,
            None => {
                self.index.insert(word.clone(), self.words.len());
                self.words.push((word, log_prob));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl LanguageModel for UnigramModel {
    fn vocabulary(&self) -> Vec<&str> {
        self.words.iter().map(|(w, _)| w.as_str()).collect()
    }

    fn unigram(&self, word: &str) -> Option<f32> {
        self.index.get(word).map(|&i| self.words[i].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARPA: &str = "\\data\\\nngram 1=3\n\n\\1-grams:\n-1.0 <s> -0.5\n-0.30103 yes\n-0.30103 no\n\n\\2-grams:\n-0.1 yes no\n\\end\\\n";

    #[test]
    fn test_arpa_unigrams() {
        let math = LogMath::natural();
        let lm = UnigramModel::from_arpa_str(ARPA, &math).unwrap();
        assert_eq!(lm.vocabulary(), vec!["<s>", "yes", "no"]);
        let yes = lm.unigram("yes").unwrap();
        assert!((math.log_to_linear(yes) - 0.5).abs() < 1e-4);
        assert_eq!(lm.unigram("maybe"), None);
    }

    #[test]
    fn test_arpa_without_unigrams() {
        assert!(UnigramModel::from_arpa_str("\\data\\\n\\end\\\n", &LogMath::natural()).is_err());
    }

    #[test]
    fn test_uniform() {
        let math = LogMath::natural();
        let lm = UnigramModel::uniform(["a", "b", "c", "d"], &math).unwrap();
        assert!((math.log_to_linear(lm.unigram("c").unwrap()) - 0.25).abs() < 1e-6);
        assert!(UnigramModel::uniform(Vec::<String>::new(), &math).is_err());
    }
}
