//! Telegram-слой бота: диспетчеризация, клавиатуры, обработчики.

pub mod handlers;
pub mod keyboards;
