
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::models::{Bot, BotUpdate, Lead, NewBot, NewLead};

pub struct BotQueries;

impl BotQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_bot: NewBot) -> Result<Bot> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let questions = serde_json::to_string(&new_bot.suggested_questions)
            .context("Failed to serialize suggested questions")?;
        let accent_color = new_bot
            .accent_color
            .unwrap_or_else(|| "#2563eb".to_string());

        sqlx::query(
            r#"
            INSERT INTO bots (id, name, agent_name, agent_role, welcome_message,
                              knowledge_base, suggested_questions, accent_color, active,
                              collect_name, collect_email, collect_phone,
                              created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new_bot.name)
        .bind(&new_bot.agent_name)
        .bind(&new_bot.agent_role)
        .bind(&new_bot.welcome_message)
        .bind(&new_bot.knowledge_base)
        .bind(&questions)
        .bind(&accent_color)
        .bind(new_bot.collect_name)
        .bind(new_bot.collect_email)
        .bind(new_bot.collect_phone)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create bot")?;

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created bot"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Bot>> {
        sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get bot by id")
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Bot>> {
        sqlx::query_as::<_, Bot>("SELECT * FROM bots ORDER BY created_at")
            .fetch_all(pool)
            .await
            .context("Failed to list bots")
    }

    /// Apply a partial update. Unset fields keep their current values.
    #[inline]
    pub async fn update(pool: &SqlitePool, id: &str, update: BotUpdate) -> Result<Option<Bot>> {
        let Some(current) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        let questions = match update.suggested_questions {
            Some(list) => serde_json::to_string(&list)
                .context("Failed to serialize suggested questions")?,
            None => current.suggested_questions,
        };
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE bots SET name = ?, agent_name = ?, agent_role = ?,
                            welcome_message = ?, knowledge_base = ?,
                            suggested_questions = ?, accent_color = ?, active = ?,
                            collect_name = ?, collect_email = ?, collect_phone = ?,
                            updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.name.unwrap_or(current.name))
        .bind(update.agent_name.unwrap_or(current.agent_name))
        .bind(update.agent_role.unwrap_or(current.agent_role))
        .bind(update.welcome_message.unwrap_or(current.welcome_message))
        .bind(update.knowledge_base.unwrap_or(current.knowledge_base))
        .bind(questions)
        .bind(update.accent_color.unwrap_or(current.accent_color))
        .bind(update.active.unwrap_or(current.active))
        .bind(update.collect_name.unwrap_or(current.collect_name))
        .bind(update.collect_email.unwrap_or(current.collect_email))
        .bind(update.collect_phone.unwrap_or(current.collect_phone))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update bot")?;

        Self::get_by_id(pool, id).await
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bots WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete bot")?;

        debug!("Deleted bot {}: {} rows", id, result.rows_affected());
        Ok(result.rows_affected() > 0)
    }
}

pub struct LeadQueries;

impl LeadQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_lead: NewLead) -> Result<Lead> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO leads (id, bot_id, name, email, phone, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_lead.bot_id)
        .bind(&new_lead.name)
        .bind(&new_lead.email)
        .bind(&new_lead.phone)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create lead")?;

        sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = ?")
            .bind(&id)
            .fetch_one(pool)
            .await
            .context("Failed to retrieve created lead")
    }

    #[inline]
    pub async fn list_for_bot(pool: &SqlitePool, bot_id: &str) -> Result<Vec<Lead>> {
        sqlx::query_as::<_, Lead>(
            "SELECT * FROM leads WHERE bot_id = ? ORDER BY created_at DESC",
        )
        .bind(bot_id)
        .fetch_all(pool)
        .await
        .context("Failed to list leads")
    }
}
