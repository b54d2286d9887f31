use super::format::{render_squad_list, render_subscription_card, user_display_name};
use super::state::{BotState, sender_user_id, subscriber_username};
use crate::panel::PanelError;
use anyhow::anyhow;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, InputFile};

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Цель админ-команды: либо telegram_id, либо @тег из локальной БД.
pub enum SubscriberTarget {
    TelegramId(i64),
    Tag(String),
}

pub fn parse_subscriber_target(arg: &str) -> Option<SubscriberTarget> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(telegram_id) = trimmed.parse::<i64>() {
        return Some(SubscriberTarget::TelegramId(telegram_id));
    }
    let tag = trimmed.strip_prefix('@')?.trim();
    if tag.is_empty() {
        return None;
    }
    Some(SubscriberTarget::Tag(tag.to_string()))
}

/// Разрешает цель в telegram_id; для @тега отвечает в чат, если не нашли.
pub async fn resolve_subscriber_target(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    arg: &str,
) -> Result<Option<i64>, Box<dyn std::error::Error + Send + Sync>> {
    match parse_subscriber_target(arg) {
        Some(SubscriberTarget::TelegramId(telegram_id)) => Ok(Some(telegram_id)),
        Some(SubscriberTarget::Tag(tag)) => {
            match state.db.find_telegram_id_by_tag(&tag).await? {
                Some(telegram_id) => Ok(Some(telegram_id)),
                None => {
                    bot.send_message(
                        chat_id,
                        format!("Подписчик @{} не найден в локальной БД.", tag),
                    )
                    .await?;
                    Ok(None)
                }
            }
        }
        None => Ok(None),
    }
}

pub fn parse_callback_page(data: &str, prefix: &str) -> Result<i64, anyhow::Error> {
    data.strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?
        .parse::<i64>()
        .map(|page| page.max(1))
        .map_err(|_| anyhow!("Некорректный номер страницы"))
}

pub fn parse_callback_user_action(data: &str, prefix: &str) -> Result<(i64, i64), anyhow::Error> {
    let payload = data
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?;
    let mut parts = payload.split(':');
    let telegram_id = parts
        .next()
        .ok_or_else(|| anyhow!("Не указан telegram_id"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный telegram_id"))?;
    let page = parts
        .next()
        .ok_or_else(|| anyhow!("Не указан номер страницы"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный номер страницы"))?;
    Ok((telegram_id, page.max(1)))
}

pub fn callback_message_target(q: &CallbackQuery) -> Option<(ChatId, teloxide::types::MessageId)> {
    q.message.as_ref().map(|msg| (msg.chat().id, msg.id()))
}

pub fn callback_prefix_filter(
    prefix: &'static str,
) -> impl Fn(CallbackQuery) -> Option<CallbackQuery> {
    move |q: CallbackQuery| {
        if q.data
            .as_deref()
            .is_some_and(|payload| payload.starts_with(prefix))
        {
            Some(q)
        } else {
            None
        }
    }
}

pub async fn require_admin_callback(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
) -> Result<Option<i64>, anyhow::Error> {
    let admin_id = q.from.id.0 as i64;
    if !state.config.is_admin(admin_id) {
        bot.answer_callback_query(q.id.clone())
            .text("Недостаточно прав")
            .show_alert(true)
            .await?;
        return Ok(None);
    }
    Ok(Some(admin_id))
}

pub fn user_id_or_reply(msg: &Message) -> Result<i64, anyhow::Error> {
    sender_user_id(msg).ok_or_else(|| anyhow!("Не удалось определить отправителя"))
}

pub fn build_qr_png_bytes(payload: &str) -> Result<Vec<u8>, anyhow::Error> {
    let qr = QrCode::new(payload.as_bytes())?;
    let image = qr
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(512, 512)
        .build();
    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        DynamicImage::ImageLuma8(image).write_to(&mut cursor, ImageFormat::Png)?;
    }
    Ok(bytes)
}

/// Отправляет подписчику (или админу про подписчика) ссылку подписки и QR.
pub async fn send_subscription_link(
    bot: &Bot,
    chat_id: ChatId,
    telegram_id: i64,
    state: &BotState,
    reply_markup: Option<teloxide::types::KeyboardMarkup>,
) -> HandlerResult {
    let username = subscriber_username(telegram_id);
    let user = match state.panel.get_user_by_username(&username).await {
        Ok(user) => user,
        Err(PanelError::NotFound) => {
            let message =
                bot.send_message(chat_id, "У вас нет VPN-профиля. Обратитесь к администратору.");
            if let Some(markup) = reply_markup {
                message.reply_markup(markup).await?;
            } else {
                message.await?;
            }
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    let Some(link) = user.subscription_url.as_deref().filter(|l| !l.is_empty()) else {
        bot.send_message(chat_id, "Панель не вернула ссылку подписки. Попробуйте позже.")
            .await?;
        return Ok(());
    };

    let message = bot.send_message(chat_id, format!("Ваша ссылка подписки:\n\n{}", link));
    if let Some(markup) = reply_markup {
        message.reply_markup(markup).await?;
    } else {
        message.await?;
    }

    let qr_png = build_qr_png_bytes(link)?;
    bot.send_photo(
        chat_id,
        InputFile::memory(qr_png).file_name(format!("vpn-sub-{}.png", telegram_id)),
    )
    .caption("QR для быстрого импорта в клиент.")
    .await?;
    Ok(())
}

/// Показывает срок подписки: карточка из панели плюс срок из локальной БД.
pub async fn send_subscription_status(
    bot: &Bot,
    chat_id: ChatId,
    telegram_id: i64,
    state: &BotState,
) -> HandlerResult {
    let db_expiry = state.db.get_expiry(telegram_id).await?;
    match state
        .panel
        .get_user_by_username(&subscriber_username(telegram_id))
        .await
    {
        Ok(user) => {
            bot.send_message(chat_id, super::format::render_panel_user_card(&user, db_expiry))
                .await?;
        }
        Err(PanelError::NotFound) => {
            let text = match db_expiry.filter(|expiry| *expiry > 0) {
                Some(expiry) => format!(
                    "Профиля в панели нет. По локальной БД подписка до {}.",
                    super::format::format_timestamp(expiry)
                ),
                None => "Подписка не найдена.".to_string(),
            };
            bot.send_message(chat_id, text).await?;
        }
        Err(error) => return Err(error.into()),
    }
    Ok(())
}

/// Удаляет подписчика из панели и из локальной БД.
pub async fn perform_subscriber_delete(
    state: &BotState,
    telegram_id: i64,
) -> Result<String, anyhow::Error> {
    let username = subscriber_username(telegram_id);
    let removed_from_panel = match state.panel.get_user_by_username(&username).await {
        Ok(user) => {
            state.panel.delete_user(&user.uuid).await?;
            true
        }
        Err(PanelError::NotFound) => false,
        Err(error) => return Err(error.into()),
    };
    let removed_from_db = state.db.delete_subscription(telegram_id).await?;

    if removed_from_panel || removed_from_db {
        Ok(format!("Подписчик {} удалён", telegram_id))
    } else {
        Ok(format!("Подписчик {} не найден", telegram_id))
    }
}

pub async fn admin_show_squads(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    message_id: Option<teloxide::types::MessageId>,
) -> HandlerResult {
    let squads = state.panel.list_internal_squads().await?;
    let text = render_squad_list(&squads, state.config.squads.max_members_per_squad);
    let keyboard = crate::bot::keyboards::squads_keyboard();

    if let Some(message_id) = message_id {
        bot.edit_message_text(chat_id, message_id, text)
            .reply_markup(keyboard)
            .await?;
    } else {
        bot.send_message(chat_id, text).reply_markup(keyboard).await?;
    }
    Ok(())
}

pub async fn admin_show_users_page(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    requested_page: i64,
    message_id: Option<teloxide::types::MessageId>,
) -> HandlerResult {
    let total_users = state.db.count_active().await?;
    let users_page_size = state.config.users_page_size.max(1);
    if total_users <= 0 {
        let text = "Активных подписчиков нет.";
        if let Some(message_id) = message_id {
            bot.edit_message_text(chat_id, message_id, text)
                .reply_markup(InlineKeyboardMarkup::default())
                .await?;
        } else {
            bot.send_message(chat_id, text)
                .reply_markup(crate::bot::keyboards::admin_menu())
                .await?;
        }
        return Ok(());
    }

    let total_pages = ((total_users + users_page_size - 1) / users_page_size).max(1);
    let page = requested_page.clamp(1, total_pages);
    let offset = (page - 1) * users_page_size;
    let users = state.db.list_active_page(users_page_size, offset).await?;

    let titles: Vec<(i64, String)> = users
        .iter()
        .map(|record| {
            (
                record.telegram_id,
                format!(
                    "{} — до {}",
                    user_display_name(record),
                    super::format::format_date(record.subscription_ends)
                ),
            )
        })
        .collect();

    let text = format!(
        "📋 Активные подписчики\nВсего: {}\nСтраница: {}/{}\n\nНажмите на подписчика, чтобы открыть карточку.",
        total_users, page, total_pages
    );
    let keyboard = crate::bot::keyboards::users_page_keyboard(&titles, page, total_pages);

    if let Some(message_id) = message_id {
        bot.edit_message_text(chat_id, message_id, text)
            .reply_markup(keyboard)
            .await?;
    } else {
        bot.send_message(chat_id, text).reply_markup(keyboard).await?;
    }
    Ok(())
}

pub async fn admin_show_stats(bot: &Bot, chat_id: ChatId, state: &BotState) -> HandlerResult {
    let stats = state.db.stats().await?;
    let panel_total = match state.panel.list_users(1, 1).await {
        Ok((_, total)) => total.to_string(),
        Err(error) => {
            tracing::warn!(error = %error, "Не удалось получить число пользователей панели");
            "недоступно".to_string()
        }
    };
    let text = format!(
        "📊 Статистика:\n\
         Записей в БД: {}\n\
         Активные: {}\n\
         Истёкшие: {}\n\
         По рефералке: {}\n\
         Пользователей в панели: {}",
        stats.total, stats.active, stats.expired, stats.referred, panel_total
    );
    bot.send_message(chat_id, text)
        .reply_markup(crate::bot::keyboards::admin_menu())
        .await?;
    Ok(())
}

/// Открывает карточку подписчика в существующем сообщении списка.
pub async fn admin_open_subscriber_card(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
    telegram_id: i64,
    page: i64,
) -> HandlerResult {
    let Some(record) = state.db.get_record(telegram_id).await? else {
        bot.answer_callback_query(q.id.clone())
            .text("Запись не найдена")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id.clone()).await?;
    if let Some((chat_id, message_id)) = callback_message_target(q) {
        bot.edit_message_text(chat_id, message_id, render_subscription_card(&record, page))
            .reply_markup(crate::bot::keyboards::user_card_keyboard(telegram_id, page))
            .await?;
    }
    Ok(())
}
