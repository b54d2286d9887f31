//! Клавиатуры бота: inline и постоянные reply-кнопки.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub const BTN_USER_LINK: &str = "🔗 Моя подписка";
pub const BTN_USER_STATUS: &str = "📅 Срок действия";
pub const BTN_USER_SUPPORT: &str = "🆘 Поддержка";

pub const BTN_ADMIN_SQUADS: &str = "👥 Отряды";
pub const BTN_ADMIN_USERS: &str = "📋 Подписчики";
pub const BTN_ADMIN_STATS: &str = "📊 Статистика";
pub const BTN_ADMIN_HELP: &str = "❓ Команды";

pub fn user_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_USER_LINK),
            KeyboardButton::new(BTN_USER_STATUS),
        ],
        vec![KeyboardButton::new(BTN_USER_SUPPORT)],
    ])
    .resize_keyboard()
    .persistent()
}

pub fn admin_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_ADMIN_SQUADS),
            KeyboardButton::new(BTN_ADMIN_USERS),
        ],
        vec![
            KeyboardButton::new(BTN_ADMIN_STATS),
            KeyboardButton::new(BTN_ADMIN_HELP),
        ],
    ])
    .resize_keyboard()
    .persistent()
}

pub fn squads_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default().append_row(vec![InlineKeyboardButton::callback(
        "🔄 Обновить",
        "squads:refresh",
    )])
}

pub fn users_page_keyboard(
    titles: &[(i64, String)],
    page: i64,
    total_pages: i64,
) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for (telegram_id, title) in titles {
        keyboard = keyboard.append_row(vec![InlineKeyboardButton::callback(
            title.clone(),
            format!("user_open:{}:{}", telegram_id, page),
        )]);
    }

    let mut nav = Vec::new();
    if page > 1 {
        nav.push(InlineKeyboardButton::callback(
            "⬅️",
            format!("users_page:{}", page - 1),
        ));
    }
    if page < total_pages {
        nav.push(InlineKeyboardButton::callback(
            "➡️",
            format!("users_page:{}", page + 1),
        ));
    }
    if !nav.is_empty() {
        keyboard = keyboard.append_row(nav);
    }
    keyboard
}

pub fn user_card_keyboard(telegram_id: i64, page: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default()
        .append_row(vec![InlineKeyboardButton::callback(
            "📤 Ссылка и QR",
            format!("user_view:{}:{}", telegram_id, page),
        )])
        .append_row(vec![
            InlineKeyboardButton::callback(
                "🗑 Удалить",
                format!("user_del:{}:{}", telegram_id, page),
            ),
            InlineKeyboardButton::callback("⬅️ К списку", format!("users_page:{}", page)),
        ])
}
