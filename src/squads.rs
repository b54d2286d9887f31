//! Балансировка внутренних отрядов панели.
//!
//! Каждый отряд несёт мягкий потолок участников. Аллокатор выбирает первый
//! отряд с запасом по вместимости либо создаёт новый `"<префикс>-<N+1>"`,
//! а отложенная нормализация вычищает из свежесозданного отряда посторонних
//! участников, которых панель навешивает туда при создании группы.

use crate::panel::{PanelClient, PanelError, Squad};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Размер страницы при полном обходе пользователей в нормализации.
const NORMALIZE_PAGE_SIZE: u64 = 200;

#[derive(Debug, Clone)]
pub struct CapacityPolicy {
    pub max_members_per_squad: i64,
    pub name_prefix: String,
    pub normalization_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub squad: Squad,
    pub was_created: bool,
}

/// Выбирает отряд с запасом по вместимости либо создаёт новый.
///
/// Счётчик участников читается с панели на каждом вызове; атомарности между
/// конкурентными аллокациями нет, потолок — ориентир, а не жёсткий лимит.
/// Ошибка создания отряда фатальна: назначать пользователя некуда.
pub async fn allocate(
    panel: &PanelClient,
    policy: &CapacityPolicy,
) -> Result<Allocation, PanelError> {
    let squads = panel.list_internal_squads().await?;
    for squad in &squads {
        if squad.members_count() < policy.max_members_per_squad {
            return Ok(Allocation {
                squad: squad.clone(),
                was_created: false,
            });
        }
    }

    let name = next_squad_name(&policy.name_prefix, &squads);
    let inbound_ids = template_inbound_ids(&squads);
    tracing::info!(
        name = %name,
        inbounds = inbound_ids.len(),
        "Все отряды заполнены, создаём новый"
    );
    let squad = panel.create_internal_squad(&name, &inbound_ids).await?;
    Ok(Allocation {
        squad,
        was_created: true,
    })
}

/// Следующее имя управляемого отряда: максимум числового суффикса среди
/// имён вида `"<префикс>-<число>"` плюс один. Чужие и кривые имена
/// (`"internal"`, `"internal-abc"`, `"other-5"`) не участвуют.
pub fn next_squad_name(prefix: &str, squads: &[Squad]) -> String {
    let mut max_index: u64 = 0;
    for squad in squads {
        let Some(suffix) = squad
            .name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            continue;
        };
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(index) = suffix.parse::<u64>() {
            max_index = max_index.max(index);
        }
    }
    format!("{}-{}", prefix, max_index + 1)
}

/// Inbound-ы для нового отряда копируются с первого отряда, у которого они
/// вообще есть; если такого нет — отряд создаётся с пустым набором.
pub fn template_inbound_ids(squads: &[Squad]) -> Vec<String> {
    squads
        .iter()
        .find(|squad| !squad.inbounds.is_empty())
        .map(|squad| squad.inbound_ids())
        .unwrap_or_default()
}

/// Отложенная корректировка состава свежесозданного отряда.
///
/// Панель при создании группы прикрепляет к ней часть существующих
/// пользователей; проход возвращает отряду единственного легитимного
/// участника. Всё best-effort: ошибка по одному пользователю логируется
/// и не прерывает обход.
pub async fn normalize_new_squad(
    panel: &PanelClient,
    squad_uuid: &str,
    intended_user_uuid: &str,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let users = match panel.list_all_users(NORMALIZE_PAGE_SIZE).await {
        Ok(users) => users,
        Err(error) => {
            tracing::warn!(
                squad = %squad_uuid,
                error = %error,
                "Нормализация отряда: не удалось получить список пользователей"
            );
            return;
        }
    };

    for user in users {
        let squad_ids = user.active_squad_ids();
        let desired: Vec<String> = if user.uuid == intended_user_uuid {
            vec![squad_uuid.to_string()]
        } else {
            squad_ids
                .iter()
                .filter(|id| id.as_str() != squad_uuid)
                .cloned()
                .collect()
        };
        if desired == squad_ids {
            continue;
        }
        match panel
            .update_user_squads(&[user.uuid.clone()], &desired)
            .await
        {
            Ok(()) => tracing::info!(
                user = %user.uuid,
                squads = ?desired,
                "Состав отрядов пользователя скорректирован"
            ),
            Err(error) => tracing::warn!(
                user = %user.uuid,
                error = %error,
                "Не удалось скорректировать отряды пользователя"
            ),
        }
    }
}

/// Запускает нормализацию отдельной задачей и возвращает её handle.
/// Вызывающий не обязан ждать завершения; тесты дожидаются handle явно.
pub fn spawn_normalization(
    panel: Arc<PanelClient>,
    squad_uuid: String,
    intended_user_uuid: String,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        normalize_new_squad(&panel, &squad_uuid, &intended_user_uuid, delay).await;
    })
}
