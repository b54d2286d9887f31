//! Оркестратор выдачи/продления VPN-идентичности подписчика.

use crate::db::Db;
use crate::panel::{NewPanelUser, PanelClient, PanelError, iso_from_timestamp};
use crate::squads::{self, CapacityPolicy};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;

const SECONDS_PER_DAY: i64 = 86_400;

/// Результат успешной выдачи: что произошло и когда кончается подписка.
#[derive(Debug)]
pub struct ProvisionOutcome {
    pub username: String,
    pub user_created: bool,
    pub new_expire: i64,
    pub squad_name: String,
    pub squad_created: bool,
    /// Handle отложенной нормализации, если отряд был создан.
    /// В боевом коде игнорируется, тесты дожидаются его явно.
    pub normalization: Option<JoinHandle<()>>,
}

pub struct Provisioner {
    panel: Arc<PanelClient>,
    db: Arc<Db>,
    policy: CapacityPolicy,
}

impl Provisioner {
    pub fn new(panel: Arc<PanelClient>, db: Arc<Db>, policy: CapacityPolicy) -> Self {
        Self { panel, db, policy }
    }

    /// Создаёт или продлевает идентичность панели для подписчика.
    ///
    /// Ошибки панели на шагах разрешения пользователя, аллокации и
    /// назначения отряда фатальны для попытки. Запись в локальную БД —
    /// best-effort: неудача логируется и не отменяет уже применённое
    /// состояние панели.
    pub async fn provision_or_extend(
        &self,
        telegram_id: i64,
        days: i64,
    ) -> Result<ProvisionOutcome, PanelError> {
        let username = telegram_id.to_string();
        let now = Utc::now().timestamp();

        let (user, user_created, new_expire) =
            match self.panel.get_user_by_username(&username).await {
                Ok(user) => {
                    let current = user.expire_timestamp().unwrap_or(now);
                    let new_expire = current.max(now) + days * SECONDS_PER_DAY;
                    self.panel
                        .update_user_expire(&username, &iso_from_timestamp(new_expire)?)
                        .await?;
                    tracing::info!(
                        telegram_id,
                        days,
                        new_expire,
                        "Подписка пользователя панели продлена"
                    );
                    (user, false, new_expire)
                }
                Err(PanelError::NotFound) => {
                    let new_expire = now + days * SECONDS_PER_DAY;
                    let expire_at = iso_from_timestamp(new_expire)?;
                    let user = self
                        .panel
                        .create_user(&NewPanelUser::active(&username, telegram_id, &expire_at))
                        .await?;
                    tracing::info!(telegram_id, days, "Создан пользователь панели");
                    (user, true, new_expire)
                }
                Err(error) => return Err(error),
            };

        let allocation = squads::allocate(&self.panel, &self.policy).await?;
        self.panel
            .update_user_squads(
                std::slice::from_ref(&user.uuid),
                std::slice::from_ref(&allocation.squad.uuid),
            )
            .await?;
        tracing::info!(
            user = %user.uuid,
            squad = %allocation.squad.name,
            created = allocation.was_created,
            "Пользователь назначен в отряд"
        );

        let normalization = allocation.was_created.then(|| {
            squads::spawn_normalization(
                self.panel.clone(),
                allocation.squad.uuid.clone(),
                user.uuid.clone(),
                self.policy.normalization_delay,
            )
        });

        if let Err(error) = self.db.upsert_expiry(telegram_id, new_expire).await {
            tracing::warn!(
                telegram_id,
                error = %error,
                "Не удалось сохранить срок подписки в локальной БД"
            );
        } else if let Err(error) = self.db.reset_reminded(telegram_id).await {
            tracing::warn!(
                telegram_id,
                error = %error,
                "Не удалось сбросить флаг напоминания"
            );
        }

        Ok(ProvisionOutcome {
            username,
            user_created,
            new_expire,
            squad_name: allocation.squad.name,
            squad_created: allocation.was_created,
            normalization,
        })
    }
}
