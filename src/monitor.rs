//! Периодический мониторинг нод и отрядов панели с оповещением админов.

use crate::bot::handlers::BotState;
use crate::panel::{PanelClient, PanelError};
use std::time::{Duration, Instant};
use teloxide::prelude::*;

/// Явное состояние антиспама оповещений вместо глобальной метки времени.
#[derive(Debug)]
pub struct AlertThrottle {
    last_alert: Option<Instant>,
    window: Duration,
}

impl AlertThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            last_alert: None,
            window,
        }
    }

    /// Пропускает оповещение, если окно с прошлого уже истекло.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last_alert {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_alert = Some(now);
                true
            }
        }
    }
}

/// Ограниченный повтор с линейной задержкой для транзиентных сбоев сети.
async fn with_retry<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, PanelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PanelError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts => {
                tracing::warn!(
                    attempt,
                    error = %error,
                    "Запрос мониторинга не удался, повторяем"
                );
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Достаёт процентную метрику из произвольных полей ноды. Панель отдаёт
/// либо долю 0..1, либо готовый процент; названия полей плавают.
fn extract_percent(extra: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<f64> {
    for key in keys {
        let Some(value) = extra.get(*key).and_then(|v| v.as_f64()) else {
            continue;
        };
        if (0.0..=1.0).contains(&value) {
            return Some(value * 100.0);
        }
        return Some(value);
    }
    None
}

const RAM_KEYS: &[&str] = &[
    "ramUsage",
    "memoryUsage",
    "memUsage",
    "memoryPercent",
];

async fn collect_alerts(
    panel: &PanelClient,
    ram_max_percent: f64,
    squad_ceiling: i64,
) -> Result<(Vec<String>, Option<i64>), PanelError> {
    let mut alerts = Vec::new();

    let stats = with_retry(3, || panel.get_system_stats()).await?;
    let online_nodes = stats.nodes.total_online;
    if let Some(ram) = stats.ram_percent()
        && ram > ram_max_percent
    {
        alerts.push(format!(
            "RAM {:.1}% > {:.0}% (система)",
            ram, ram_max_percent
        ));
    }

    let nodes = with_retry(3, || panel.list_nodes()).await?;
    for node in &nodes {
        if node.is_connected == Some(false) {
            alerts.push(format!("Нода офлайн: {}", node.label()));
        }
        if let Some(ram) = extract_percent(&node.extra, RAM_KEYS)
            && ram > ram_max_percent
        {
            alerts.push(format!(
                "RAM {:.1}% > {:.0}% (нода: {})",
                ram,
                ram_max_percent,
                node.label()
            ));
        }
    }

    let squads = with_retry(3, || panel.list_internal_squads()).await?;
    for squad in &squads {
        if squad.members_count() > squad_ceiling {
            alerts.push(format!(
                "Отряд '{}': участников {} > {}",
                squad.name,
                squad.members_count(),
                squad_ceiling
            ));
        }
    }

    Ok((alerts, online_nodes))
}

fn alert_header(online_nodes: Option<i64>) -> String {
    match online_nodes {
        Some(count) => format!("⚠️ Мониторинг нагрузки (онлайн нод: {}):", count),
        None => "⚠️ Мониторинг нагрузки:".to_string(),
    }
}

async fn send_admin_alert(bot: &Bot, state: &BotState, text: &str) {
    for admin_id in &state.config.admin_ids {
        if let Err(error) = bot.send_message(ChatId(*admin_id), text.to_string()).await {
            tracing::warn!(
                admin_id = *admin_id,
                error = %error,
                "Не удалось отправить оповещение мониторинга"
            );
        }
    }
}

/// Бесконечный цикл мониторинга; запускается отдельной задачей из main.
pub async fn run_monitor_loop(bot: Bot, state: BotState) {
    let monitor = &state.config.monitor;
    let mut throttle = AlertThrottle::new(Duration::from_secs(monitor.alert_throttle_seconds));
    let mut ticker = tokio::time::interval(Duration::from_secs(monitor.interval_seconds.max(30)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let (alerts, online_nodes) = match collect_alerts(
            &state.panel,
            monitor.node_ram_max_percent,
            state.config.squads.max_members_per_squad,
        )
        .await
        {
            Ok(collected) => collected,
            Err(error) => {
                tracing::error!(error = %error, "Цикл мониторинга не смог опросить панель");
                continue;
            }
        };

        if alerts.is_empty() {
            tracing::debug!("Мониторинг: всё в норме");
            continue;
        }
        if !throttle.allow() {
            tracing::info!(alerts = alerts.len(), "Оповещения подавлены антиспамом");
            continue;
        }

        let text = format!(
            "{}\n{}",
            alert_header(online_nodes),
            alerts
                .iter()
                .map(|a| format!("• {}", a))
                .collect::<Vec<_>>()
                .join("\n")
        );
        send_admin_alert(&bot, &state, &text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_blocks_within_window() {
        let mut throttle = AlertThrottle::new(Duration::from_secs(300));
        assert!(throttle.allow());
        assert!(!throttle.allow());
    }

    #[test]
    fn throttle_with_zero_window_always_allows() {
        let mut throttle = AlertThrottle::new(Duration::ZERO);
        assert!(throttle.allow());
        assert!(throttle.allow());
    }

    #[test]
    fn header_carries_online_node_count() {
        assert_eq!(
            alert_header(Some(3)),
            "⚠️ Мониторинг нагрузки (онлайн нод: 3):"
        );
        assert_eq!(alert_header(None), "⚠️ Мониторинг нагрузки:");
    }

    #[test]
    fn percent_extraction_scales_fractions() {
        let extra: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "ramUsage": 0.42 })).unwrap();
        assert_eq!(extract_percent(&extra, RAM_KEYS), Some(42.0));

        let extra: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "memoryPercent": 87.5 })).unwrap();
        assert_eq!(extract_percent(&extra, RAM_KEYS), Some(87.5));

        let extra: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "cpu": 10 })).unwrap();
        assert_eq!(extract_percent(&extra, RAM_KEYS), None);
    }
}
