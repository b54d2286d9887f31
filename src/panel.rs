//! HTTP-клиент панели VPN: отряды, пользователи, bulk-операции.
//!
//! Все ответы панели на чтение завёрнуты в конверт `{"response": ...}`.
//! Клиент не кэширует состояние панели; единственное, что живёт в памяти
//! процесса, — bearer-токен, полученный через login-обмен.

use crate::config::PanelConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Не найдено в панели")]
    NotFound,
    #[error("Панель отклонила авторизацию")]
    Unauthorized,
    #[error("Панель вернула статус {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Ошибка запроса к панели: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Не заданы учётные данные панели (token или username/password)")]
    MissingCredentials,
    #[error("Некорректный ответ панели: {0}")]
    BadResponse(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Squad {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub info: SquadInfo,
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquadInfo {
    #[serde(default)]
    pub members_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub uuid: String,
}

impl Squad {
    pub fn members_count(&self) -> i64 {
        self.info.members_count
    }

    pub fn inbound_ids(&self) -> Vec<String> {
        self.inbounds.iter().map(|i| i.uuid.clone()).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelUser {
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub expire_at: Option<String>,
    #[serde(default)]
    pub subscription_url: Option<String>,
    #[serde(default)]
    pub active_internal_squads: Vec<SquadRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquadRef {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl PanelUser {
    /// Срок действия подписки как unix-время, если панель его вернула.
    pub fn expire_timestamp(&self) -> Option<i64> {
        self.expire_at
            .as_deref()
            .and_then(|value| timestamp_from_iso(value).ok())
    }

    pub fn active_squad_ids(&self) -> Vec<String> {
        self.active_internal_squads
            .iter()
            .map(|s| s.uuid.clone())
            .collect()
    }
}

/// Нода панели; помимо известных полей таскает произвольные метрики,
/// формат которых различается между версиями панели.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelNode {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_connected: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PanelNode {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.uuid.as_deref())
            .unwrap_or("unknown")
    }
}

/// Сводные метрики панели: онлайн-ноды и системная память хоста.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    #[serde(default)]
    pub nodes: SystemNodeTotals,
    #[serde(default)]
    pub memory: SystemMemory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNodeTotals {
    #[serde(default)]
    pub total_online: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemMemory {
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub used: Option<f64>,
}

impl SystemStats {
    /// Занятая системная память в процентах, если панель отдала обе цифры.
    pub fn ram_percent(&self) -> Option<f64> {
        match (self.memory.used, self.memory.total) {
            (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SquadListPayload {
    #[serde(default)]
    internal_squads: Vec<Squad>,
}

#[derive(Deserialize)]
struct UserListPayload {
    #[serde(default)]
    users: Vec<PanelUser>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPanelUser<'a> {
    pub username: &'a str,
    pub expire_at: &'a str,
    pub telegram_id: i64,
    pub status: &'a str,
    pub traffic_limit_bytes: u64,
    pub traffic_limit_strategy: &'a str,
}

impl<'a> NewPanelUser<'a> {
    pub fn active(username: &'a str, telegram_id: i64, expire_at: &'a str) -> Self {
        Self {
            username,
            expire_at,
            telegram_id,
            status: "ACTIVE",
            traffic_limit_bytes: 0,
            traffic_limit_strategy: "NO_RESET",
        }
    }
}

pub struct PanelClient {
    http: reqwest::Client,
    base_url: String,
    static_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    cached_token: Mutex<Option<String>>,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()
            .map_err(|e| anyhow::anyhow!("Не удалось создать HTTP-клиент: {}", e))?;
        Ok(Self {
            http,
            base_url: normalize_base_url(&config.base_url)?,
            static_token: config.token.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            cached_token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Возвращает действующий токен: статический из конфига либо полученный
    /// через login-обмен и закэшированный на время жизни процесса.
    async fn ensure_token(&self) -> Result<String, PanelError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }
        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(PanelError::MissingCredentials);
        };
        let resp = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let payload: Envelope<LoginPayload> = resp.json().await?;
        tracing::info!("Получен bearer-токен панели через login");
        *cached = Some(payload.response.access_token.clone());
        Ok(payload.response.access_token)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, PanelError> {
        let token = self.ensure_token().await?;
        let resp = builder.bearer_auth(token).send().await?;
        check_status(resp).await
    }

    pub async fn list_internal_squads(&self) -> Result<Vec<Squad>, PanelError> {
        let resp = self.send(self.http.get(self.url("/api/internal-squads"))).await?;
        let payload: Envelope<SquadListPayload> = resp.json().await?;
        Ok(payload.response.internal_squads)
    }

    pub async fn create_internal_squad(
        &self,
        name: &str,
        inbound_ids: &[String],
    ) -> Result<Squad, PanelError> {
        let resp = self
            .send(
                self.http
                    .post(self.url("/api/internal-squads"))
                    .json(&serde_json::json!({ "name": name, "inbounds": inbound_ids })),
            )
            .await?;
        let payload: Envelope<Squad> = resp.json().await?;
        Ok(payload.response)
    }

    /// Страница списка пользователей. Нумерация с единицы; вызывающий
    /// продолжает, пока `page * size < total`.
    pub async fn list_users(&self, page: u64, size: u64) -> Result<(Vec<PanelUser>, u64), PanelError> {
        let resp = self
            .send(self.http.get(self.url("/api/users")).query(&[
                ("page", page),
                ("size", size),
                ("limit", size),
            ]))
            .await?;
        let payload: Envelope<UserListPayload> = resp.json().await?;
        Ok((payload.response.users, payload.response.total))
    }

    /// Полный обход списка пользователей с доверием к `total` панели.
    pub async fn list_all_users(&self, page_size: u64) -> Result<Vec<PanelUser>, PanelError> {
        let size = page_size.max(1);
        let mut page = 1;
        let mut all = Vec::new();
        loop {
            let (users, total) = self.list_users(page, size).await?;
            if users.is_empty() {
                break;
            }
            all.extend(users);
            if page * size >= total {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<PanelUser, PanelError> {
        let resp = self
            .send(self.http.get(self.url(&format!("/api/users/by-username/{}", username))))
            .await?;
        let payload: Envelope<PanelUser> = resp.json().await?;
        Ok(payload.response)
    }

    pub async fn create_user(&self, user: &NewPanelUser<'_>) -> Result<PanelUser, PanelError> {
        let resp = self
            .send(self.http.post(self.url("/api/users")).json(user))
            .await?;
        let payload: Envelope<PanelUser> = resp.json().await?;
        Ok(payload.response)
    }

    /// Частичное обновление пользователя, панель матчит по username/uuid.
    pub async fn update_user(&self, patch: &serde_json::Value) -> Result<(), PanelError> {
        self.send(self.http.patch(self.url("/api/users")).json(patch))
            .await?;
        Ok(())
    }

    pub async fn update_user_expire(
        &self,
        username: &str,
        expire_at: &str,
    ) -> Result<(), PanelError> {
        self.update_user(&serde_json::json!({
            "username": username,
            "expireAt": expire_at,
        }))
        .await
    }

    pub async fn delete_user(&self, uuid: &str) -> Result<(), PanelError> {
        self.send(self.http.delete(self.url(&format!("/api/users/{}", uuid))))
            .await?;
        Ok(())
    }

    pub async fn bulk_add_members(
        &self,
        squad_uuid: &str,
        user_uuids: &[String],
    ) -> Result<(), PanelError> {
        self.send(
            self.http
                .post(self.url(&format!(
                    "/api/internal-squads/{}/bulk-actions/add-users",
                    squad_uuid
                )))
                .json(&serde_json::json!({ "userUuids": user_uuids })),
        )
        .await?;
        Ok(())
    }

    pub async fn bulk_remove_members(
        &self,
        squad_uuid: &str,
        user_uuids: &[String],
    ) -> Result<(), PanelError> {
        self.send(
            self.http
                .delete(self.url(&format!(
                    "/api/internal-squads/{}/bulk-actions/remove-users",
                    squad_uuid
                )))
                .json(&serde_json::json!({ "userUuids": user_uuids })),
        )
        .await?;
        Ok(())
    }

    /// Полностью заменяет набор активных отрядов у перечисленных пользователей.
    pub async fn update_user_squads(
        &self,
        user_uuids: &[String],
        squad_uuids: &[String],
    ) -> Result<(), PanelError> {
        self.send(
            self.http
                .post(self.url("/api/users/bulk/update-squads"))
                .json(&serde_json::json!({
                    "uuids": user_uuids,
                    "activeInternalSquads": squad_uuids,
                })),
        )
        .await?;
        Ok(())
    }

    pub async fn get_system_stats(&self) -> Result<SystemStats, PanelError> {
        let resp = self.send(self.http.get(self.url("/api/system/stats"))).await?;
        let payload: Envelope<SystemStats> = resp.json().await?;
        Ok(payload.response)
    }

    pub async fn list_nodes(&self) -> Result<Vec<PanelNode>, PanelError> {
        let resp = self.send(self.http.get(self.url("/api/nodes"))).await?;
        let payload: Envelope<Vec<PanelNode>> = resp.json().await?;
        Ok(payload.response)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, PanelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status.as_u16() {
        401 => Err(PanelError::Unauthorized),
        404 => Err(PanelError::NotFound),
        code => {
            let body = resp.text().await.unwrap_or_default();
            Err(PanelError::Status { status: code, body })
        }
    }
}

fn normalize_base_url(value: &str) -> Result<String, anyhow::Error> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("panel.base_url не задан"));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("https://{}", trimmed))
    }
}

/// Unix-время -> ISO-8601 в UTC с суффиксом `Z`, как ждёт панель.
pub fn iso_from_timestamp(ts: i64) -> Result<String, PanelError> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| PanelError::BadResponse(format!("Некорректный timestamp: {}", ts)))
}

pub fn timestamp_from_iso(value: &str) -> Result<i64, PanelError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|e| PanelError::BadResponse(format!("Некорректная дата '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization() {
        assert_eq!(
            normalize_base_url("https://panel.example.com/").unwrap(),
            "https://panel.example.com"
        );
        assert_eq!(
            normalize_base_url("panel.example.com").unwrap(),
            "https://panel.example.com"
        );
        assert_eq!(
            normalize_base_url("http://10.0.0.1:3000").unwrap(),
            "http://10.0.0.1:3000"
        );
        assert!(normalize_base_url("   ").is_err());
    }

    #[test]
    fn expire_round_trip() {
        let iso = iso_from_timestamp(1_700_000_000).unwrap();
        assert!(iso.ends_with('Z'));
        assert_eq!(timestamp_from_iso(&iso).unwrap(), 1_700_000_000);
    }

    #[test]
    fn timestamp_accepts_offset_form() {
        assert_eq!(
            timestamp_from_iso("2023-11-14T22:13:20+00:00").unwrap(),
            1_700_000_000
        );
        assert!(timestamp_from_iso("не дата").is_err());
    }

    #[test]
    fn squad_payload_shape() {
        let squad: Squad = serde_json::from_value(serde_json::json!({
            "uuid": "s-1",
            "name": "internal-1",
            "info": { "membersCount": 7 },
            "inbounds": [{ "uuid": "in-1" }, { "uuid": "in-2" }]
        }))
        .unwrap();
        assert_eq!(squad.members_count(), 7);
        assert_eq!(squad.inbound_ids(), vec!["in-1", "in-2"]);

        // Панель может вернуть отряд без info/inbounds сразу после создания.
        let bare: Squad = serde_json::from_value(serde_json::json!({
            "uuid": "s-2",
            "name": "internal-2"
        }))
        .unwrap();
        assert_eq!(bare.members_count(), 0);
        assert!(bare.inbound_ids().is_empty());
    }

    #[test]
    fn system_stats_ram_percent() {
        let stats: SystemStats = serde_json::from_value(serde_json::json!({
            "nodes": { "totalOnline": 2 },
            "memory": { "total": 8000.0, "used": 6000.0 }
        }))
        .unwrap();
        assert_eq!(stats.nodes.total_online, Some(2));
        assert_eq!(stats.ram_percent(), Some(75.0));

        // Без одной из цифр процент не считается.
        let partial: SystemStats =
            serde_json::from_value(serde_json::json!({ "memory": { "used": 100.0 } })).unwrap();
        assert_eq!(partial.ram_percent(), None);

        let empty: SystemStats = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty.ram_percent(), None);
    }

    #[test]
    fn user_payload_shape() {
        let user: PanelUser = serde_json::from_value(serde_json::json!({
            "uuid": "u-1",
            "username": "42",
            "expireAt": "2023-11-14T22:13:20Z",
            "subscriptionUrl": "https://sub.example.com/u-1",
            "activeInternalSquads": [{ "uuid": "s-1", "name": "internal-1" }]
        }))
        .unwrap();
        assert_eq!(user.expire_timestamp(), Some(1_700_000_000));
        assert_eq!(user.active_squad_ids(), vec!["s-1"]);
    }
}
