use super::commands::{admin_show_squads_cmd, admin_show_stats_cmd, admin_show_users_cmd, cmd_help};
use super::shared::{send_subscription_link, send_subscription_status, HandlerResult};
use super::state::{sender_user_id, BotState};
use teloxide::prelude::*;

pub async fn handle_menu_buttons(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let is_admin = state.config.is_admin(user_id);

    match text {
        crate::bot::keyboards::BTN_USER_LINK => {
            send_subscription_link(
                &bot,
                msg.chat.id,
                user_id,
                &state,
                Some(crate::bot::keyboards::user_menu()),
            )
            .await?;
        }
        crate::bot::keyboards::BTN_USER_STATUS => {
            send_subscription_status(&bot, msg.chat.id, user_id, &state).await?;
        }
        crate::bot::keyboards::BTN_USER_SUPPORT => {
            bot.send_message(
                msg.chat.id,
                "По вопросам подписки напишите администратору.",
            )
            .reply_markup(crate::bot::keyboards::user_menu())
            .await?;
        }
        crate::bot::keyboards::BTN_ADMIN_SQUADS if is_admin => {
            admin_show_squads_cmd(&bot, msg.chat.id, &state).await?;
        }
        crate::bot::keyboards::BTN_ADMIN_USERS if is_admin => {
            admin_show_users_cmd(&bot, msg.chat.id, &state).await?;
        }
        crate::bot::keyboards::BTN_ADMIN_STATS if is_admin => {
            admin_show_stats_cmd(&bot, msg.chat.id, &state).await?;
        }
        crate::bot::keyboards::BTN_ADMIN_HELP if is_admin => {
            cmd_help(bot, msg, state).await?;
        }
        _ => {
            let reply_text = if is_admin {
                "Не понял команду. Используйте кнопки админ-меню ниже."
            } else {
                "Не понял запрос. Используйте кнопки меню ниже."
            };
            let reply_markup = if is_admin {
                crate::bot::keyboards::admin_menu()
            } else {
                crate::bot::keyboards::user_menu()
            };
            bot.send_message(msg.chat.id, reply_text)
                .reply_markup(reply_markup)
                .await?;
        }
    }
    Ok(())
}
