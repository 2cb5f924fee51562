
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

/// A bot configuration record. `suggested_questions` is stored as a JSON
/// array in a TEXT column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub agent_name: String,
    pub agent_role: String,
    pub welcome_message: String,
    /// Free-text knowledge base, injected as a system instruction.
    /// Never indexed; uploaded files are the only retrieval source.
    pub knowledge_base: String,
    pub suggested_questions: String,
    pub accent_color: String,
    pub active: bool,
    pub collect_name: bool,
    pub collect_email: bool,
    pub collect_phone: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Bot {
    /// Parse the stored suggested-questions JSON, tolerating legacy or
    /// hand-edited rows.
    #[inline]
    pub fn suggested_question_list(&self) -> Vec<String> {
        serde_json::from_str(&self.suggested_questions).unwrap_or_else(|e| {
            warn!("Malformed suggested_questions for bot {}: {}", self.id, e);
            Vec::new()
        })
    }

    /// Public-safe projection served to the embeddable loader. Never
    /// includes the file list, knowledge base text, or cache paths.
    #[inline]
    pub fn widget_config(&self) -> WidgetConfig {
        WidgetConfig {
            bot_id: self.id.clone(),
            active: self.active,
            agent_name: self.agent_name.clone(),
            agent_role: self.agent_role.clone(),
            welcome_message: self.welcome_message.clone(),
            suggested_questions: self.suggested_question_list(),
            accent_color: self.accent_color.clone(),
            collect_name: self.collect_name,
            collect_email: self.collect_email,
            collect_phone: self.collect_phone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewBot {
    pub name: String,
    pub agent_name: String,
    pub agent_role: String,
    pub welcome_message: String,
    pub knowledge_base: String,
    pub suggested_questions: Vec<String>,
    pub accent_color: Option<String>,
    pub collect_name: bool,
    pub collect_email: bool,
    pub collect_phone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BotUpdate {
    pub name: Option<String>,
    pub agent_name: Option<String>,
    pub agent_role: Option<String>,
    pub welcome_message: Option<String>,
    pub knowledge_base: Option<String>,
    pub suggested_questions: Option<Vec<String>>,
    pub accent_color: Option<String>,
    pub active: Option<bool>,
    pub collect_name: Option<bool>,
    pub collect_email: Option<bool>,
    pub collect_phone: Option<bool>,
}

/// Reduced bot projection for the embeddable widget loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub bot_id: String,
    pub active: bool,
    pub agent_name: String,
    pub agent_role: String,
    pub welcome_message: String,
    pub suggested_questions: Vec<String>,
    pub accent_color: String,
    pub collect_name: bool,
    pub collect_email: bool,
    pub collect_phone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Lead {
    pub id: String,
    pub bot_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewLead {
    pub bot_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl NewLead {
    /// True when no field carries a value. Fully skipped collection flows
    /// produce these; persistence silently drops them.
    #[inline]
    pub fn is_empty(&self) -> bool {
        fn blank(v: Option<&String>) -> bool {
            v.is_none_or(|s| s.trim().is_empty())
        }
        blank(self.name.as_ref()) && blank(self.email.as_ref()) && blank(self.phone.as_ref())
    }
}
