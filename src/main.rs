//! squadron-admin — Telegram-бот администрирования VPN-панели.

use squadron_admin::{bot, config, db, monitor, panel, provision};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/squadron-admin.toml"));
    tracing::info!(
        "Starting squadron-admin with config {}",
        config_path.display()
    );

    let config = Arc::new(config::Config::load(&config_path)?);
    let token = config.bot_token()?;
    tracing::info!(
        admin_count = config.admin_ids.len(),
        db_path = %config.db_path.display(),
        panel_base_url = %config.panel.base_url,
        squad_prefix = %config.squads.name_prefix,
        squad_ceiling = config.squads.max_members_per_squad,
        users_page_size = config.users_page_size,
        "Configuration loaded"
    );

    let db = Arc::new(db::Db::open(&config.db_path).await?);
    let panel = Arc::new(panel::PanelClient::new(&config.panel)?);
    let provisioner = Arc::new(provision::Provisioner::new(
        panel.clone(),
        db.clone(),
        config.capacity_policy(),
    ));

    let bot = Bot::new(token);
    if let Err(error) = bot.get_me().await {
        tracing::warn!(
            error = %error,
            "Не удалось проверить токен бота через getMe"
        );
    }

    let state = bot::handlers::BotState {
        config: config.clone(),
        db,
        panel,
        provisioner,
    };

    if config.monitor.enabled {
        tokio::spawn(monitor::run_monitor_loop(bot.clone(), state.clone()));
        tracing::info!(
            interval_seconds = config.monitor.interval_seconds,
            "Monitor job started"
        );
    }

    tracing::info!("Dispatcher initialized, bot is ready");
    Dispatcher::builder(bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
