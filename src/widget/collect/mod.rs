
// Sequential lead-collection flow, interleaved with the chat transcript.
// The whole flow is one explicit state value transitioned by a pure
// reducer; rendering and network effects are returned as data so the UI
// layer stays free of bookkeeping flags.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ChatTurn;

/// Whether a message is rendered in the transcript. Hidden messages are
/// still part of the history sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub visibility: Visibility,
}

impl ChatMessage {
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "user".to_string(),
            content: content.into(),
            visibility: Visibility::Visible,
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "assistant".to_string(),
            content: content.into(),
            visibility: Visibility::Visible,
        }
    }

    /// A user-role message carried in the history but never rendered.
    #[inline]
    pub fn hidden_user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "user".to_string(),
            content: content.into(),
            visibility: Visibility::Hidden,
        }
    }
}

/// Messages to render, in order.
#[inline]
pub fn visible_transcript(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
    messages
        .iter()
        .filter(|m| m.visibility == Visibility::Visible)
        .collect()
}

/// Full history for the model, hidden messages included.
#[inline]
pub fn model_payload(messages: &[ChatMessage]) -> Vec<ChatTurn> {
    messages
        .iter()
        .map(|m| ChatTurn {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect()
}

/// Fields the flow can ask for, in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectField {
    Name,
    Email,
    Phone,
}

impl CollectField {
    #[inline]
    pub fn prompt(self) -> &'static str {
        match self {
            CollectField::Name => "May I have your name?",
            CollectField::Email => "What email address can we reach you at?",
            CollectField::Phone => "What phone number can we reach you at?",
        }
    }
}

/// Which fields a bot has collection enabled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectFlags {
    pub name: bool,
    pub email: bool,
    pub phone: bool,
}

impl CollectFlags {
    #[inline]
    pub fn any_enabled(self) -> bool {
        self.name || self.email || self.phone
    }

    fn queue(self) -> Vec<CollectField> {
        let mut queue = Vec::new();
        if self.name {
            queue.push(CollectField::Name);
        }
        if self.email {
            queue.push(CollectField::Email);
        }
        if self.phone {
            queue.push(CollectField::Phone);
        }
        queue
    }
}

/// Values captured so far. Skipped fields stay `None`, never empty
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeadRecord {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl LeadRecord {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none()
    }

    fn set(&mut self, field: CollectField, value: String) {
        match field {
            CollectField::Name => self.name = Some(value),
            CollectField::Email => self.email = Some(value),
            CollectField::Phone => self.phone = Some(value),
        }
    }

    /// Summary forwarded to the model so it can acknowledge naturally.
    fn summary(&self) -> String {
        if self.is_empty() {
            return "I chose not to share my contact information. Please continue helping me."
                .to_string();
        }

        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("name: {name}"));
        }
        if let Some(email) = &self.email {
            parts.push(format!("email: {email}"));
        }
        if let Some(phone) = &self.phone {
            parts.push(format!("phone: {phone}"));
        }
        format!(
            "I've provided my information ({}). Please continue helping me.",
            parts.join(", ")
        )
    }
}

/// The collection flow as a single explicit state value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectState {
    Idle,
    Awaiting {
        field: CollectField,
        remaining: Vec<CollectField>,
        collected: LeadRecord,
    },
    Complete,
}

/// What the user did with the current field's prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Value(String),
    Skip,
}

/// Side effects for the caller to perform. UI effects are synchronous;
/// `FlushLead` and `NotifyModel` are fire-and-forget, and their failure
/// never rolls back the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Show the collection bubble with this prompt.
    ShowBubble(String),
    /// Rewrite the existing bubble in place with this text.
    RewriteBubble(String),
    /// Remove the collection bubble from the transcript.
    RemoveBubble,
    /// Submit the collected values to the lead endpoint.
    FlushLead(LeadRecord),
    /// Append this hidden message and request the next model turn.
    NotifyModel(ChatMessage),
}

/// Whether the flow should start: collection enabled, first assistant
/// reply just arrived, and this browser has not been prompted for this
/// bot before (the caller persists `already_prompted` per bot).
#[inline]
pub fn should_trigger(
    flags: CollectFlags,
    already_prompted: bool,
    assistant_replies: usize,
) -> bool {
    flags.any_enabled() && !already_prompted && assistant_replies == 1
}

/// Transition `Idle` into asking for the first enabled field.
#[inline]
pub fn trigger(state: &CollectState, flags: CollectFlags) -> (CollectState, Vec<Effect>) {
    if *state != CollectState::Idle {
        return (state.clone(), Vec::new());
    }

    let mut queue = flags.queue();
    if queue.is_empty() {
        return (CollectState::Complete, Vec::new());
    }

    let field = queue.remove(0);
    let effects = vec![Effect::ShowBubble(field.prompt().to_string())];
    (
        CollectState::Awaiting {
            field,
            remaining: queue,
            collected: LeadRecord::default(),
        },
        effects,
    )
}

/// Handle a submission (value or explicit skip) for the awaited field.
#[inline]
pub fn advance(state: &CollectState, submission: Submission) -> (CollectState, Vec<Effect>) {
    let CollectState::Awaiting {
        field,
        remaining,
        collected,
    } = state
    else {
        return (state.clone(), Vec::new());
    };

    let mut collected = collected.clone();
    if let Submission::Value(value) = submission {
        let value = value.trim().to_string();
        if !value.is_empty() {
            collected.set(*field, value);
        }
    }

    let mut remaining = remaining.clone();
    if remaining.is_empty() {
        let effects = vec![
            Effect::RemoveBubble,
            Effect::NotifyModel(ChatMessage::hidden_user(collected.summary())),
            Effect::FlushLead(collected),
        ];
        return (CollectState::Complete, effects);
    }

    let next = remaining.remove(0);
    let effects = vec![Effect::RewriteBubble(format!(
        "Thank you! {}",
        next.prompt()
    ))];
    (
        CollectState::Awaiting {
            field: next,
            remaining,
            collected,
        },
        effects,
    )
}
