//! SQLite-слой учёта подписок: сроки, рефералы, флаги напоминаний.

use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRecord {
    pub telegram_id: i64,
    pub telegram_tag: Option<String>,
    pub subscription_ends: i64,
    pub referrer_tag: Option<String>,
    pub is_referred: bool,
    pub referred_people: i64,
    pub gifted_subscriptions: i64,
    pub reminded: bool,
    pub nurture_stage: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct SubscriptionStats {
    pub total: i64,
    pub active: i64,
    pub expired: i64,
    pub referred: i64,
}

const SELECT_COLUMNS: &str = "telegram_id, telegram_tag, subscription_ends, referrer_tag, \
     is_referred, referred_people, gifted_subscriptions, reminded, nurture_stage, created_at";

pub struct Db {
    pool: SqlitePool,
}

fn current_unix_timestamp() -> Result<i64, anyhow::Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .map_err(|err| anyhow::anyhow!("Системное время меньше UNIX_EPOCH: {}", err))
}

impl Db {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Не удалось создать директорию для БД: {}", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| anyhow::anyhow!("Не удалось подключиться к SQLite: {}", e))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// БД в памяти — для тестов и локальных прогонов.
    pub async fn open_in_memory() -> Result<Self, anyhow::Error> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| anyhow::anyhow!("Не удалось открыть SQLite в памяти: {}", e))?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER NOT NULL,
                telegram_tag TEXT,
                subscription_ends INTEGER NOT NULL DEFAULT 0,
                referrer_tag TEXT,
                is_referred INTEGER NOT NULL DEFAULT 0,
                referred_people INTEGER NOT NULL DEFAULT 0,
                gifted_subscriptions INTEGER NOT NULL DEFAULT 0,
                reminded INTEGER NOT NULL DEFAULT 0,
                nurture_stage INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT 0,
                UNIQUE(telegram_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscription_ends ON subscription(subscription_ends);
            CREATE INDEX IF NOT EXISTS idx_subscription_tag ON subscription(telegram_tag);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция БД: {}", e))?;

        self.ensure_column_exists("subscription", "reminded", "INTEGER NOT NULL DEFAULT 0")
            .await?;
        self.ensure_column_exists("subscription", "nurture_stage", "INTEGER NOT NULL DEFAULT 0")
            .await?;

        Ok(())
    }

    async fn ensure_column_exists(
        &self,
        table: &str,
        column: &str,
        sql_type: &str,
    ) -> Result<(), anyhow::Error> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = '{}'",
            table, column
        ))
        .fetch_one(&self.pool)
        .await?;
        if count == 0 {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table, column, sql_type
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Создаёт запись подписчика целиком (новая регистрация).
    pub async fn insert_new_user(
        &self,
        telegram_id: i64,
        telegram_tag: Option<&str>,
        subscription_ends: i64,
        referrer_tag: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        let now = current_unix_timestamp()?;
        sqlx::query(
            "INSERT INTO subscription
             (telegram_id, telegram_tag, subscription_ends, referrer_tag, is_referred,
              referred_people, gifted_subscriptions, reminded, nurture_stage, created_at)
             VALUES (?, ?, ?, ?, 0, 0, 0, 0, 0, ?)",
        )
        .bind(telegram_id)
        .bind(telegram_tag)
        .bind(subscription_ends)
        .bind(referrer_tag)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Сохраняет срок подписки, создавая запись при отсутствии.
    pub async fn upsert_expiry(
        &self,
        telegram_id: i64,
        subscription_ends: i64,
    ) -> Result<(), anyhow::Error> {
        let now = current_unix_timestamp()?;
        sqlx::query(
            "INSERT INTO subscription (telegram_id, subscription_ends, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(telegram_id) DO UPDATE SET subscription_ends = excluded.subscription_ends",
        )
        .bind(telegram_id)
        .bind(subscription_ends)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Запоминает @тег подписчика, не трогая срок подписки.
    pub async fn remember_tag(&self, telegram_id: i64, tag: &str) -> Result<(), anyhow::Error> {
        let now = current_unix_timestamp()?;
        sqlx::query(
            "INSERT INTO subscription (telegram_id, telegram_tag, subscription_ends, created_at)
             VALUES (?, ?, 0, ?)
             ON CONFLICT(telegram_id) DO UPDATE SET telegram_tag = excluded.telegram_tag",
        )
        .bind(telegram_id)
        .bind(tag)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_expiry(&self, telegram_id: i64) -> Result<Option<i64>, anyhow::Error> {
        let value = sqlx::query_scalar::<_, i64>(
            "SELECT subscription_ends FROM subscription WHERE telegram_id = ?",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn get_record(
        &self,
        telegram_id: i64,
    ) -> Result<Option<SubscriptionRecord>, anyhow::Error> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {} FROM subscription WHERE telegram_id = ?",
            SELECT_COLUMNS
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Сбрасывает флаг «напоминание отправлено» после продления.
    pub async fn reset_reminded(&self, telegram_id: i64) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE subscription SET reminded = 0 WHERE telegram_id = ?")
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_referrer_tag(
        &self,
        telegram_id: i64,
        tag: &str,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE subscription SET referrer_tag = ? WHERE telegram_id = ?")
            .bind(tag)
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Атомарно помечает пользователя как приглашённого и увеличивает счётчик
    /// пригласившего. Возвращает false, если реферал уже был засчитан.
    pub async fn award_referral(
        &self,
        referrer_tag: &str,
        telegram_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let marked = sqlx::query(
            "UPDATE subscription SET is_referred = 1 WHERE telegram_id = ? AND is_referred = 0",
        )
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;
        if marked.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE subscription SET referred_people = referred_people + 1 WHERE telegram_tag = ?",
        )
        .bind(referrer_tag)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Ищет telegram_id по тегу (без учёта регистра, без @).
    pub async fn find_telegram_id_by_tag(
        &self,
        tag: &str,
    ) -> Result<Option<i64>, anyhow::Error> {
        let normalized = tag.trim_start_matches('@');
        if normalized.is_empty() {
            return Ok(None);
        }
        let telegram_id = sqlx::query_scalar::<_, i64>(
            "SELECT telegram_id FROM subscription
             WHERE lower(telegram_tag) = lower(?)
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        Ok(telegram_id)
    }

    pub async fn delete_subscription(&self, telegram_id: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM subscription WHERE telegram_id = ?")
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active(&self) -> Result<i64, anyhow::Error> {
        let now = current_unix_timestamp()?;
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscription WHERE subscription_ends > ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    pub async fn list_active_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SubscriptionRecord>, anyhow::Error> {
        let now = current_unix_timestamp()?;
        let rows = sqlx::query_as::<_, SubscriptionRecord>(&format!(
            "SELECT {} FROM subscription
             WHERE subscription_ends > ?
             ORDER BY subscription_ends ASC
             LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn stats(&self) -> Result<SubscriptionStats, anyhow::Error> {
        let now = current_unix_timestamp()?;
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscription")
            .fetch_one(&self.pool)
            .await?;
        let active = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscription WHERE subscription_ends > ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let referred = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscription WHERE is_referred = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SubscriptionStats {
            total,
            active,
            expired: total - active,
            referred,
        })
    }
}
