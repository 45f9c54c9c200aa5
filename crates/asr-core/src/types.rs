//! Общие типы потока данных декодера.
//!
//! Фронтенд (вне этого workspace) выдаёт последовательность [`Data`]:
//! либо кадр признаков, либо сигнал границы потока. Сигналы — не ошибки,
//! а явные маркеры, которые скорер отличает от содержимого.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::AsrResult;
use crate::traits::FrameSource;

// ---------------------------------------------------------------------------
// Кадр признаков
// ---------------------------------------------------------------------------

/// Один кадр акустических признаков.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Порядковый номер кадра в высказывании.
    pub index: usize,

    /// Вектор признаков (или готовые оценки сенонов для гибридных моделей).
    pub values: Vec<f32>,
}

impl FeatureFrame {
    /// Создать новый кадр.
    pub fn new(index: usize, values: Vec<f32>) -> Self {
        Self { index, values }
    }

    /// Размерность кадра.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

// ---------------------------------------------------------------------------
// Сигналы и данные
// ---------------------------------------------------------------------------

/// Маркеры границ потока.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Начало аудиопотока.
    DataStart,
    /// Начало речи.
    SpeechStart,
    /// Конец речи.
    SpeechEnd,
    /// Конец аудиопотока.
    DataEnd,
}

impl Signal {
    /// Завершает ли сигнал высказывание.
    pub fn ends_utterance(self) -> bool {
        matches!(self, Signal::SpeechEnd | Signal::DataEnd)
    }
}

/// Элемент потока: кадр или сигнал.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Frame(FeatureFrame),
    Signal(Signal),
}

// ---------------------------------------------------------------------------
// Источник кадров из памяти
// ---------------------------------------------------------------------------

/// Источник кадров поверх заранее подготовленной очереди.
///
/// Используется в CLI (кадры из JSON) и в тестах.
#[derive(Debug, Clone, Default)]
pub struct VecFrameSource {
    queue: VecDeque<Data>,
}

impl VecFrameSource {
    /// Создать источник из готовой последовательности данных.
    pub fn new(data: impl IntoIterator<Item = Data>) -> Self {
        Self {
            queue: data.into_iter().collect(),
        }
    }

    /// Обернуть кадры сигналами `DataStart` / `DataEnd`.
    pub fn from_frames(frames: impl IntoIterator<Item = Vec<f32>>) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(Data::Signal(Signal::DataStart));
        queue.extend(
            frames
                .into_iter()
                .enumerate()
                .map(|(i, values)| Data::Frame(FeatureFrame::new(i, values))),
        );
        queue.push_back(Data::Signal(Signal::DataEnd));
        Self { queue }
    }

    /// Сколько элементов осталось.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl FrameSource for VecFrameSource {
    fn next_data(&mut self) -> AsrResult<Option<Data>> {
        Ok(self.queue.pop_front())
    }
}
