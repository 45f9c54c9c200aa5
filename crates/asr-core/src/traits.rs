//! Трейты внешних коллабораторов декодера.

use crate::error::AsrResult;
use crate::types::Data;

/// Источник кадров признаков для менеджера поиска.
///
/// Реализуется фронтендом (обработка сигнала вне этого workspace) или
/// заранее подготовленной очередью [`crate::types::VecFrameSource`].
///
/// # Пример
///
/// ```ignore
/// let mut source = VecFrameSource::from_frames(frames);
/// while let Some(data) = source.next_data()? {
///     // кадр или сигнал границы потока
/// }
/// ```
pub trait FrameSource: Send {
    /// Следующий элемент потока.
    ///
    /// `Ok(None)` означает, что поток исчерпан без сигнала конца.
    ///
    /// # Ошибки
    ///
    /// Ошибки чтения признаков (I/O, повреждённые данные).
    fn next_data(&mut self) -> AsrResult<Option<Data>>;
}
