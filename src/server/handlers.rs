use std::convert::Infallible;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{BotUpdate, NewBot, NewLead};
use crate::engine::{self, system_instruction, validate_conversation};
use crate::model::ChatTurn;
use crate::server::error::ApiError;
use crate::server::state::SharedState;
use crate::widget::stream::{encode_done, encode_error, encode_text_delta};

/// MIME types accepted for document upload.
const ALLOWED_MIME_TYPES: &[&str] = &["application/pdf", "text/plain", "text/markdown"];

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// --- Bot CRUD ---

pub async fn create_bot(
    State(state): State<SharedState>,
    Json(new_bot): Json<NewBot>,
) -> Result<impl IntoResponse, ApiError> {
    if new_bot.name.trim().is_empty() {
        return Err(ApiError::bad_request("Bot name cannot be empty"));
    }

    let bot = state.database.create_bot(new_bot).await?;
    info!("Created bot {} ({})", bot.name, bot.id);
    Ok((StatusCode::CREATED, Json(bot)))
}

pub async fn list_bots(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.list_bots().await?))
}

pub async fn get_bot(
    State(state): State<SharedState>,
    Path(bot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state
        .database
        .get_bot(&bot_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Bot not found"))?;
    Ok(Json(bot))
}

pub async fn update_bot(
    State(state): State<SharedState>,
    Path(bot_id): Path<String>,
    Json(update): Json<BotUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state
        .database
        .update_bot(&bot_id, update)
        .await?
        .ok_or_else(|| ApiError::not_found("Bot not found"))?;
    Ok(Json(bot))
}

pub async fn delete_bot(
    State(state): State<SharedState>,
    Path(bot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.database.delete_bot(&bot_id).await? {
        return Err(ApiError::not_found("Bot not found"));
    }

    // The file store and index cache are derived per-bot artifacts
    engine::purge_bot_data(&state.config, &bot_id)?;
    info!("Deleted bot {}", bot_id);
    Ok(StatusCode::NO_CONTENT)
}

// --- Widget data ---

/// Public-safe projection for the embeddable loader. Inactive bots
/// expose nothing beyond the inactive flag, so the loader renders
/// nothing.
pub async fn widget_config(
    State(state): State<SharedState>,
    Path(bot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state
        .database
        .get_bot(&bot_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Bot not found"))?;

    if !bot.active {
        return Ok(Json(json!({ "bot_id": bot.id, "active": false })));
    }

    Ok(Json(serde_json::to_value(bot.widget_config()).map_err(
        |e| anyhow::anyhow!("Failed to serialize widget config: {}", e),
    )?))
}

// --- File lifecycle ---

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FailedUpload {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Serialize, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub saved: Vec<String>,
    pub failed: Vec<FailedUpload>,
}

/// Multipart upload. Each file is validated and written independently;
/// one bad file never aborts the batch.
pub async fn upload_files(
    State(state): State<SharedState>,
    Path(bot_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if state.database.get_bot(&bot_id).await?.is_none() {
        return Err(ApiError::not_found("Bot not found"));
    }

    let files_dir = state.config.bot_files_dir(&bot_id);
    tokio::fs::create_dir_all(&files_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create file store: {}", e))?;

    let max_bytes = state.config.server.max_upload_bytes;
    let mut report = UploadReport::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let file_name = match sanitize_file_name(&original_name) {
            Some(name) => name,
            None => {
                report.failed.push(FailedUpload {
                    name: original_name,
                    error: "Invalid file name".to_string(),
                });
                continue;
            }
        };

        if !content_type
            .as_deref()
            .is_some_and(|ct| ALLOWED_MIME_TYPES.contains(&ct))
        {
            report.failed.push(FailedUpload {
                name: original_name,
                error: format!(
                    "Unsupported file type {} (allowed: pdf, plain text, markdown)",
                    content_type.as_deref().unwrap_or("unknown")
                ),
            });
            continue;
        }

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                report.failed.push(FailedUpload {
                    name: original_name,
                    error: format!("Failed to read upload: {}", e),
                });
                continue;
            }
        };

        if data.len() as u64 > max_bytes {
            report.failed.push(FailedUpload {
                name: original_name,
                error: format!(
                    "File exceeds the {}MB size limit",
                    max_bytes / (1024 * 1024)
                ),
            });
            continue;
        }

        match write_file(&files_dir.join(&file_name), &data).await {
            Ok(()) => {
                debug!("Stored {} for bot {}", file_name, bot_id);
                report.saved.push(file_name);
            }
            Err(e) => {
                warn!("Failed to store {} for bot {}: {}", file_name, bot_id, e);
                report.failed.push(FailedUpload {
                    name: original_name,
                    error: "Failed to store file".to_string(),
                });
            }
        }
    }

    Ok(Json(report))
}

async fn write_file(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await
}

/// Remove one file and invalidate the bot's entire index cache; the next
/// chat request rebuilds from the remaining files.
pub async fn delete_file(
    State(state): State<SharedState>,
    Path((bot_id, file_name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(file_name) = sanitize_file_name(&file_name) else {
        return Err(ApiError::bad_request("Invalid file name"));
    };

    if state.database.get_bot(&bot_id).await?.is_none() {
        return Err(ApiError::not_found("Bot not found"));
    }

    if !engine::remove_bot_file(&state.config, &bot_id, &file_name)? {
        return Err(ApiError::not_found("File not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Restrict file names to a safe character set and reject traversal
/// attempts. Returns `None` when nothing safe remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.').to_string();
    (!sanitized.is_empty()).then_some(sanitized)
}

// --- Leads ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    pub bot_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Persist a captured lead and send a best-effort email notification.
/// An entirely empty submission is a silent no-op.
pub async fn submit_lead(
    State(state): State<SharedState>,
    Json(submission): Json<LeadSubmission>,
) -> Result<Response, ApiError> {
    let new_lead = NewLead {
        bot_id: submission.bot_id.clone(),
        name: clean_field(submission.name),
        email: clean_field(submission.email),
        phone: clean_field(submission.phone),
    };

    if new_lead.is_empty() {
        debug!("Empty lead submission for bot {}, ignoring", submission.bot_id);
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let bot = state
        .database
        .get_bot(&submission.bot_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Bot not found"))?;

    let lead = state.database.create_lead(new_lead).await?;

    // Fire-and-forget: email dispatch failure never fails this request
    let notifier = state.notifier.clone();
    let bot_name = bot.name.clone();
    let lead_for_email = lead.clone();
    tokio::spawn(async move {
        notifier.notify_lead(&bot_name, &lead_for_email).await;
    });

    Ok((StatusCode::CREATED, Json(lead)).into_response())
}

fn clean_field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn list_leads(
    State(state): State<SharedState>,
    Path(bot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.list_leads(&bot_id).await?))
}

// --- Chat streaming ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    pub bot_id: String,
    #[serde(default)]
    pub knowledge_base: String,
    #[serde(default)]
    pub agent_name: String,
}

/// Streaming chat endpoint. All preconditions are validated before the
/// stream starts; after that, failures can only be reported as an error
/// frame inside the stream.
pub async fn chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    validate_conversation(&request.messages)?;

    // The id feeds path derivation in the engine; only known bots proceed
    if state.database.get_bot(&request.bot_id).await?.is_none() {
        return Err(ApiError::not_found("Bot not found"));
    }

    let factory = state.factory.as_ref().ok_or_else(|| {
        ApiError::server_config(format!(
            "No model API key configured (set {})",
            crate::config::API_KEY_ENV
        ))
    })?;

    let engine = factory.build_engine(&request.bot_id).await?;
    debug!(
        "Chat for bot {}: index decision {:?}",
        request.bot_id,
        engine.decision()
    );

    let instruction = system_instruction(&request.knowledge_base, &request.agent_name);
    let token_stream = engine.answer_stream(instruction, request.messages).await?;

    let framed = token_stream
        .scan(false, |errored, item| {
            if *errored {
                return futures::future::ready(None);
            }
            let line = match item {
                Ok(delta) => encode_text_delta(&delta),
                Err(e) => {
                    warn!("Chat stream interrupted: {}", e);
                    *errored = true;
                    encode_error(&e.to_string())
                }
            };
            futures::future::ready(Some(line))
        })
        .chain(futures::stream::once(futures::future::ready(encode_done())))
        .map(|line| Ok::<_, Infallible>(Bytes::from(line)));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(framed))
        .map_err(|e| anyhow::anyhow!("Failed to build stream response: {}", e))?;

    Ok(response)
}
