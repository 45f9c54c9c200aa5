//! Вспомогательные функции для отладочного вывода поиска.

use std::sync::OnceLock;

/// Возвращает `true`, если включён покадровый вывод размеров решётки токенов.
///
/// Управляется переменной окружения `RUSTASR_TOKEN_TRACE` (любое значение).
pub fn token_trace_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("RUSTASR_TOKEN_TRACE").is_some())
}
