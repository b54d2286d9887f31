use crate::config::Config;
use crate::db::Db;
use crate::panel::PanelClient;
use crate::provision::Provisioner;
use std::sync::Arc;
use teloxide::types::Message;

#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub db: Arc<Db>,
    pub panel: Arc<PanelClient>,
    pub provisioner: Arc<Provisioner>,
}

/// Username подписчика в панели — строковый telegram_id.
pub fn subscriber_username(telegram_id: i64) -> String {
    telegram_id.to_string()
}

pub fn sender_user_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

pub fn sender_tag(msg: &Message) -> Option<String> {
    msg.from.as_ref().and_then(|user| user.username.clone())
}

pub fn is_admin_message(msg: &Message, state: &BotState) -> bool {
    sender_user_id(msg).is_some_and(|user_id| state.config.is_admin(user_id))
}
