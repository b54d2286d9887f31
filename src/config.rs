//! Конфигурация бота: TOML-файл с секциями панели, отрядов и мониторинга.

use crate::squads::CapacityPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub bot_token: String,
    pub admin_ids: Vec<i64>,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_users_page_size")]
    pub users_page_size: i64,
    pub panel: PanelConfig,
    #[serde(default)]
    pub squads: SquadConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Доступ к REST API панели: либо статический токен, либо логин/пароль.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SquadConfig {
    pub max_members_per_squad: i64,
    pub name_prefix: String,
    pub normalization_delay_seconds: f64,
}

impl Default for SquadConfig {
    fn default() -> Self {
        Self {
            max_members_per_squad: 30,
            name_prefix: "internal".to_string(),
            normalization_delay_seconds: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub node_ram_max_percent: f64,
    pub alert_throttle_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            node_ram_max_percent: 90.0,
            alert_throttle_seconds: 300,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/squadron-admin/subscriptions.db")
}

fn default_users_page_size() -> i64 {
    8
}

fn default_request_timeout() -> u64 {
    5
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Не удалось прочитать конфиг {}: {}", path.display(), e)
        })?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Некорректный конфиг {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.admin_ids.is_empty() {
            return Err(anyhow::anyhow!("admin_ids не может быть пустым"));
        }
        if self.panel.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("panel.base_url не задан"));
        }
        if self.panel.token.is_none()
            && (self.panel.username.is_none() || self.panel.password.is_none())
        {
            return Err(anyhow::anyhow!(
                "Нужен либо panel.token, либо panel.username + panel.password"
            ));
        }
        if self.squads.max_members_per_squad < 1 {
            return Err(anyhow::anyhow!(
                "squads.max_members_per_squad должен быть >= 1"
            ));
        }
        if self.squads.name_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("squads.name_prefix не может быть пустым"));
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Result<String, anyhow::Error> {
        let token = self.bot_token.trim();
        if token.is_empty() {
            return Err(anyhow::anyhow!("bot_token не задан"));
        }
        Ok(token.to_string())
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn capacity_policy(&self) -> CapacityPolicy {
        CapacityPolicy {
            max_members_per_squad: self.squads.max_members_per_squad,
            name_prefix: self.squads.name_prefix.clone(),
            normalization_delay: Duration::from_secs_f64(
                self.squads.normalization_delay_seconds.max(0.0),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Config {
        toml::from_str(raw).expect("конфиг должен парситься")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(
            r#"
            bot_token = "123:abc"
            admin_ids = [1]

            [panel]
            base_url = "https://panel.example.com"
            token = "secret"
            "#,
        );
        config.validate().unwrap();
        assert_eq!(config.squads.max_members_per_squad, 30);
        assert_eq!(config.squads.name_prefix, "internal");
        assert_eq!(config.squads.normalization_delay_seconds, 5.0);
        assert_eq!(config.panel.request_timeout_seconds, 5);
        assert!(config.monitor.enabled);
        assert_eq!(config.users_page_size, 8);
    }

    #[test]
    fn validate_rejects_missing_credentials() {
        let config = parse(
            r#"
            bot_token = "123:abc"
            admin_ids = [1]

            [panel]
            base_url = "https://panel.example.com"
            username = "admin"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn capacity_policy_from_sections() {
        let config = parse(
            r#"
            bot_token = "123:abc"
            admin_ids = [1, 2]

            [panel]
            base_url = "https://panel.example.com"
            token = "secret"

            [squads]
            max_members_per_squad = 12
            name_prefix = "pool"
            normalization_delay_seconds = 0.5
            "#,
        );
        let policy = config.capacity_policy();
        assert_eq!(policy.max_members_per_squad, 12);
        assert_eq!(policy.name_prefix, "pool");
        assert_eq!(policy.normalization_delay, Duration::from_millis(500));
        assert!(config.is_admin(2));
        assert!(!config.is_admin(3));
    }
}
