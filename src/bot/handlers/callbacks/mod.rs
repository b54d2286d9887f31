use super::shared::{
    admin_open_subscriber_card, admin_show_squads, admin_show_users_page, callback_message_target,
    callback_prefix_filter, parse_callback_page, parse_callback_user_action,
    perform_subscriber_delete, require_admin_callback, send_subscription_link, HandlerResult,
};
use super::state::BotState;
use teloxide::dptree;
use teloxide::prelude::*;

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    Update::filter_callback_query()
        .branch(
            dptree::filter_map(callback_prefix_filter("squads:")).endpoint(callback_squads_refresh),
        )
        .branch(
            dptree::filter_map(callback_prefix_filter("users_page:")).endpoint(callback_users_page),
        )
        .branch(dptree::filter_map(callback_prefix_filter("user_open:")).endpoint(callback_user_open))
        .branch(dptree::filter_map(callback_prefix_filter("user_view:")).endpoint(callback_user_view))
        .branch(dptree::filter_map(callback_prefix_filter("user_del:")).endpoint(callback_user_del))
}

async fn callback_squads_refresh(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_admin_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    bot.answer_callback_query(q.id.clone()).text("Обновляю").await?;
    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        admin_show_squads(&bot, chat_id, &state, Some(message_id)).await?;
    }
    Ok(())
}

async fn callback_users_page(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_admin_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    let data = q.data.as_deref().unwrap_or("");
    let page = parse_callback_page(data, "users_page:")?;
    bot.answer_callback_query(q.id.clone()).await?;

    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        admin_show_users_page(&bot, chat_id, &state, page, Some(message_id)).await?;
    }
    Ok(())
}

async fn callback_user_open(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_admin_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    let data = q.data.as_deref().unwrap_or("");
    let (telegram_id, page) = parse_callback_user_action(data, "user_open:")?;
    admin_open_subscriber_card(&bot, &q, &state, telegram_id, page).await
}

async fn callback_user_view(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_admin_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }

    let data = q.data.as_deref().unwrap_or("");
    let (telegram_id, _) = parse_callback_user_action(data, "user_view:")?;

    bot.answer_callback_query(q.id.clone())
        .text("Отправляю ссылку и QR")
        .await?;
    if let Some((chat_id, _)) = callback_message_target(&q) {
        send_subscription_link(&bot, chat_id, telegram_id, &state, None).await?;
    }
    Ok(())
}

async fn callback_user_del(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(admin_id) = require_admin_callback(&bot, &q, &state).await? else {
        return Ok(());
    };

    let data = q.data.as_deref().unwrap_or("");
    let (telegram_id, page) = parse_callback_user_action(data, "user_del:")?;
    tracing::info!(
        admin_id = admin_id,
        telegram_id = telegram_id,
        "Удаление подписчика через карточку"
    );

    let status_text = perform_subscriber_delete(&state, telegram_id).await?;
    bot.answer_callback_query(q.id.clone())
        .text(status_text.clone())
        .await?;

    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        bot.send_message(chat_id, status_text).await?;
        admin_show_users_page(&bot, chat_id, &state, page, Some(message_id)).await?;
    }
    Ok(())
}
