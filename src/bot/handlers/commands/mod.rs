use super::format::render_provision_report;
use super::shared::{
    admin_show_squads, admin_show_stats, admin_show_users_page, perform_subscriber_delete,
    resolve_subscriber_target, send_subscription_link, send_subscription_status,
    user_id_or_reply, HandlerResult,
};
use super::state::{is_admin_message, sender_tag, sender_user_id, BotState};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Главное меню")]
    Start,
    #[command(description = "Справка")]
    Help,
    #[command(description = "Получить ссылку подписки")]
    Link,
    #[command(description = "Срок действия подписки")]
    Status,
    #[command(description = "Выдать/продлить подписку (админ)")]
    Provision,
    #[command(description = "Продлить подписку (админ)")]
    Extend,
    #[command(description = "Удалить подписчика (админ)")]
    Delete,
    #[command(description = "Отряды панели (админ)")]
    Squads,
    #[command(description = "Статистика (админ)")]
    Stats,
}

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::filter_command::<BotCommand, _>()
        .branch(dptree::case![BotCommand::Start].endpoint(cmd_start))
        .branch(dptree::case![BotCommand::Help].endpoint(cmd_help))
        .branch(dptree::case![BotCommand::Link].endpoint(cmd_link))
        .branch(dptree::case![BotCommand::Status].endpoint(cmd_status))
        .branch(dptree::case![BotCommand::Provision].endpoint(cmd_provision))
        .branch(dptree::case![BotCommand::Extend].endpoint(cmd_extend))
        .branch(dptree::case![BotCommand::Delete].endpoint(cmd_delete))
        .branch(dptree::case![BotCommand::Squads].endpoint(cmd_squads))
        .branch(dptree::case![BotCommand::Stats].endpoint(cmd_stats))
}

async fn cmd_start(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let user_id = match user_id_or_reply(&msg) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(error = %error, "Получен /start без отправителя");
            return Ok(());
        }
    };
    tracing::info!(user_id = user_id, "Получена команда /start");

    if state.config.is_admin(user_id) {
        bot.send_message(
            msg.chat.id,
            "Панель администратора VPN. Используйте кнопки ниже.",
        )
        .reply_markup(crate::bot::keyboards::admin_menu())
        .await?;
        return Ok(());
    }

    // Запоминаем @тег (для адресации /provision @tag) и реферальную метку
    // из deep-link вида "/start ref_<тег>". Всё best-effort.
    let tag = sender_tag(&msg);
    let referrer_tag = msg
        .text()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .and_then(|payload| payload.strip_prefix("ref_"))
        .map(str::to_string)
        .filter(|referrer| Some(referrer) != tag.as_ref());
    if let Err(error) = register_subscriber(&state, user_id, tag.as_deref(), referrer_tag.as_deref()).await {
        tracing::warn!(user_id = user_id, error = %error, "Не удалось обновить запись подписчика");
    }

    bot.send_message(
        msg.chat.id,
        "Добро пожаловать! Здесь можно получить ссылку подписки и посмотреть её срок.",
    )
    .reply_markup(crate::bot::keyboards::user_menu())
    .await?;
    Ok(())
}

/// Регистрация/обновление записи подписчика при /start.
/// Реферал засчитывается один раз, самоприглашение отфильтровано выше.
async fn register_subscriber(
    state: &BotState,
    user_id: i64,
    tag: Option<&str>,
    referrer_tag: Option<&str>,
) -> Result<(), anyhow::Error> {
    match state.db.get_record(user_id).await? {
        None => {
            state.db.insert_new_user(user_id, tag, 0, referrer_tag).await?;
        }
        Some(record) => {
            if let Some(tag) = tag {
                state.db.remember_tag(user_id, tag).await?;
            }
            if record.referrer_tag.is_none()
                && let Some(referrer) = referrer_tag
            {
                state.db.set_referrer_tag(user_id, referrer).await?;
            }
        }
    }
    if let Some(referrer) = referrer_tag
        && state.db.award_referral(referrer, user_id).await?
    {
        tracing::info!(user_id = user_id, referrer = referrer, "Засчитан реферал");
    }
    Ok(())
}

/// Текст /help; административный блок виден только админам.
fn help_text(is_admin: bool) -> String {
    let mut text = String::from(
        "Команды:\n\
         /link — получить ссылку подписки и QR\n\
         /status — срок действия подписки",
    );
    if is_admin {
        text.push_str(
            "\n\nДля администраторов:\n\
             /provision <tg_id | @тег> [дни] — выдать или продлить подписку (по умолчанию 30 дней)\n\
             /extend <tg_id | @тег> <дни> — продлить подписку\n\
             /delete <tg_id | @тег> — удалить подписчика из панели и БД\n\
             /squads — отряды панели и их заполненность\n\
             /stats — статистика подписок",
        );
    }
    text
}

pub async fn cmd_help(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let is_admin = state.config.is_admin(user_id);
    let text = help_text(is_admin);
    let reply_markup = if is_admin {
        crate::bot::keyboards::admin_menu()
    } else {
        crate::bot::keyboards::user_menu()
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(reply_markup)
        .await?;
    Ok(())
}

async fn cmd_link(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    tracing::info!(user_id = user_id, "Получена команда /link");

    send_subscription_link(
        &bot,
        msg.chat.id,
        user_id,
        &state,
        Some(crate::bot::keyboards::user_menu()),
    )
    .await
}

async fn cmd_status(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };

    // Админ может спросить статус конкретного подписчика.
    let arg = msg
        .text()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .unwrap_or("");
    let target_id = if is_admin_message(&msg, &state) && !arg.is_empty() {
        match resolve_subscriber_target(&bot, msg.chat.id, &state, arg).await? {
            Some(telegram_id) => telegram_id,
            None => return Ok(()),
        }
    } else {
        user_id
    };
    tracing::info!(user_id = user_id, target_id = target_id, "Получена команда /status");

    send_subscription_status(&bot, msg.chat.id, target_id, &state).await
}

async fn provision_for_days(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    usage: &str,
    default_days: Option<i64>,
) -> HandlerResult {
    let args: Vec<&str> = msg.text().unwrap_or("").split_whitespace().collect();
    let Some(target_arg) = args.get(1).copied() else {
        bot.send_message(msg.chat.id, usage).await?;
        return Ok(());
    };
    let days = match (args.get(2), default_days) {
        (Some(value), _) => match value.parse::<i64>() {
            Ok(parsed) if parsed >= 1 => parsed,
            _ => {
                bot.send_message(msg.chat.id, "Число дней должно быть целым и >= 1.")
                    .await?;
                return Ok(());
            }
        },
        (None, Some(default)) => default,
        (None, None) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
    };

    let Some(telegram_id) = resolve_subscriber_target(bot, msg.chat.id, state, target_arg).await?
    else {
        if !target_arg.is_empty() && !target_arg.starts_with('@') {
            bot.send_message(msg.chat.id, usage).await?;
        }
        return Ok(());
    };
    tracing::info!(telegram_id = telegram_id, days = days, "Выдача подписки админом");

    match state.provisioner.provision_or_extend(telegram_id, days).await {
        Ok(outcome) => {
            bot.send_message(msg.chat.id, render_provision_report(&outcome))
                .await?;
        }
        Err(error) => {
            tracing::error!(telegram_id = telegram_id, error = %error, "Ошибка выдачи подписки");
            bot.send_message(msg.chat.id, format!("❌ Ошибка панели: {}", error))
                .await?;
        }
    }
    Ok(())
}

async fn cmd_provision(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    provision_for_days(
        &bot,
        &msg,
        &state,
        "Использование: /provision <tg_id | @тег> [дни]",
        Some(30),
    )
    .await
}

async fn cmd_extend(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    provision_for_days(
        &bot,
        &msg,
        &state,
        "Использование: /extend <tg_id | @тег> <дни>",
        None,
    )
    .await
}

async fn cmd_delete(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }

    let arg = msg
        .text()
        .unwrap_or("")
        .split_whitespace()
        .nth(1)
        .unwrap_or("");
    let Some(telegram_id) = resolve_subscriber_target(&bot, msg.chat.id, &state, arg).await? else {
        if !arg.starts_with('@') {
            bot.send_message(msg.chat.id, "Использование: /delete <tg_id | @тег>")
                .await?;
        }
        return Ok(());
    };
    tracing::info!(telegram_id = telegram_id, "Удаление подписчика админом");

    let status_text = perform_subscriber_delete(&state, telegram_id).await?;
    bot.send_message(msg.chat.id, status_text).await?;
    Ok(())
}

async fn cmd_squads(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    tracing::info!("Запрошен список отрядов");
    admin_show_squads(&bot, msg.chat.id, &state, None).await
}

async fn cmd_stats(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_admin_message(&msg, &state) {
        return Ok(());
    }
    admin_show_stats(&bot, msg.chat.id, &state).await
}

pub async fn admin_show_squads_cmd(bot: &Bot, chat_id: ChatId, state: &BotState) -> HandlerResult {
    admin_show_squads(bot, chat_id, state, None).await
}

pub async fn admin_show_users_cmd(bot: &Bot, chat_id: ChatId, state: &BotState) -> HandlerResult {
    admin_show_users_page(bot, chat_id, state, 1, None).await
}

pub async fn admin_show_stats_cmd(bot: &Bot, chat_id: ChatId, state: &BotState) -> HandlerResult {
    admin_show_stats(bot, chat_id, state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_hides_admin_commands_from_users() {
        let user_help = help_text(false);
        assert!(user_help.contains("/link"));
        assert!(!user_help.contains("/provision"));
        assert!(!user_help.contains("администраторов"));

        let admin_help = help_text(true);
        assert!(admin_help.contains("/provision"));
        assert!(admin_help.contains("/delete"));
    }
}
