use crate::db::SubscriptionRecord;
use crate::panel::{PanelUser, Squad};
use crate::provision::ProvisionOutcome;
use chrono::{DateTime, Local, Utc};

pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S %:z")
                .to_string()
        })
        .unwrap_or_else(|| format!("Некорректный timestamp: {}", ts))
}

pub fn format_date(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&Local).format("%d.%m.%Y").to_string())
        .unwrap_or_else(|| "—".to_string())
}

pub fn user_display_name(record: &SubscriptionRecord) -> String {
    record
        .telegram_tag
        .as_ref()
        .map(|tag| format!("@{}", tag))
        .unwrap_or_else(|| format!("id {}", record.telegram_id))
}

pub fn render_subscription_card(record: &SubscriptionRecord, page: i64) -> String {
    format!(
        "👤 Карточка подписчика\n\n\
         Страница списка: {}\n\
         TG ID: {}\n\
         Тег: {}\n\
         Подписка до: {}\n\
         Рефералов приведено: {}\n\
         Подарено подписок: {}\n\
         Создано: {}",
        page,
        record.telegram_id,
        record.telegram_tag.as_deref().unwrap_or("—"),
        format_timestamp(record.subscription_ends),
        record.referred_people,
        record.gifted_subscriptions,
        format_timestamp(record.created_at),
    )
}

pub fn render_squad_list(squads: &[Squad], ceiling: i64) -> String {
    if squads.is_empty() {
        return "📭 Внутренних отрядов нет.".to_string();
    }
    let mut lines = vec![format!(
        "👥 Внутренние отряды (потолок {}):\n",
        ceiling
    )];
    for squad in squads {
        let marker = if squad.members_count() >= ceiling {
            " ⛔"
        } else {
            ""
        };
        lines.push(format!(
            "• {} — {}/{}{}",
            squad.name,
            squad.members_count(),
            ceiling,
            marker
        ));
    }
    lines.join("\n")
}

pub fn render_panel_user_card(user: &PanelUser, db_expiry: Option<i64>) -> String {
    let squads = if user.active_internal_squads.is_empty() {
        "—".to_string()
    } else {
        user.active_internal_squads
            .iter()
            .map(|s| s.name.clone().unwrap_or_else(|| s.uuid.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "🛰 Пользователь панели {}\n\
         UUID: {}\n\
         Подписка до: {}\n\
         Отряды: {}\n\
         В локальной БД: {}",
        user.username,
        user.uuid,
        user.expire_timestamp()
            .map(format_timestamp)
            .unwrap_or_else(|| "—".to_string()),
        squads,
        db_expiry
            .map(format_timestamp)
            .unwrap_or_else(|| "записи нет".to_string()),
    )
}

pub fn render_provision_report(outcome: &ProvisionOutcome) -> String {
    let action = if outcome.user_created {
        "создан"
    } else {
        "продлён"
    };
    let squad_note = if outcome.squad_created {
        format!("{} (новый)", outcome.squad_name)
    } else {
        outcome.squad_name.clone()
    };
    format!(
        "✅ Пользователь {} {}.\n\
         📆 Подписка до: {}\n\
         👥 Отряд: {}",
        outcome.username,
        action,
        format_timestamp(outcome.new_expire),
        squad_note
    )
}
