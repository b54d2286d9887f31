//! squadron-admin — Telegram-бот администрирования VPN-панели
//! с балансировкой внутренних отрядов по вместимости.
//!
//! Библиотечная часть: единая реализация аллокатора/нормализации,
//! которую используют и бот, и тесты (и любой другой процесс-потребитель).

pub mod bot;
pub mod config;
pub mod db;
pub mod monitor;
pub mod panel;
pub mod provision;
pub mod squads;
