use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use tracing::info;

use crate::{
    auth::{uid_for_email, Identity},
    error::AppError,
    state::AppState,
    store::{unix_millis, AdminRecord, NewOption, VoteOutcome},
};

#[derive(Deserialize)]
pub struct VotePayload {
    pub option_id: String,
}

#[derive(Deserialize)]
pub struct OptionPayload {
    pub name: String,
    pub emoji: String,
    pub color: String,
}

#[derive(Deserialize, Default)]
pub struct AdminPayload {
    pub uid: Option<String>,
    pub email: Option<String>,
}

/// Verified non-admins stop here; unverifiable callers never get this far.
async fn require_admin(state: &AppState, identity: &Identity) -> Result<(), AppError> {
    if state.store.is_admin(&identity.uid).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub async fn options_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.store.list_options().await?))
}

/// Full-snapshot SSE stream: every mutation resends the whole option list,
/// a slow reader only ever observes the newest snapshot.
pub async fn live_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = WatchStream::new(state.store.subscribe())
        .map(|snapshot| Event::default().json_data(&snapshot));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn vote_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VotePayload>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .store
        .cast_vote(&identity.uid, &payload.option_id)
        .await?;

    match outcome {
        VoteOutcome::Recorded => info!("Vote recorded for {}", payload.option_id),
        VoteOutcome::AlreadyVoted => info!("Duplicate vote ignored for {}", payload.option_id),
    }

    Ok(Json(json!({ "status": outcome })))
}

pub async fn reset_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &identity).await?;
    state.store.reset_votes().await?;
    info!("Results reset by {}", identity.uid);
    Ok(Json(json!({ "ok": true })))
}

pub async fn option_add_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OptionPayload>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &identity).await?;

    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Option name must not be empty".to_string(),
        ));
    }
    let record = state
        .store
        .add_option(NewOption::new(
            payload.name.trim(),
            &payload.emoji,
            &payload.color,
        ))
        .await?;
    Ok(Json(record))
}

pub async fn option_remove_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &identity).await?;
    state.store.remove_option(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn admins_list_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &identity).await?;
    let admins = state.store.list_admins().await?;
    Ok(Json(json!({ "admins": admins })))
}

pub async fn admins_add_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdminPayload>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &identity).await?;

    let (uid, email) = match (payload.uid, payload.email) {
        (Some(uid), _) if !uid.trim().is_empty() => (uid.trim().to_string(), None),
        (_, Some(email)) => {
            let uid = uid_for_email(&state.config.auth_secret, &email).ok_or_else(|| {
                AppError::BadRequest(format!("Unable to resolve uid for {email}"))
            })?;
            (uid, Some(email.trim().to_ascii_lowercase()))
        }
        _ => return Err(AppError::BadRequest("Provide uid or email".to_string())),
    };

    let record = state
        .store
        .put_admin(AdminRecord {
            uid,
            created_at: unix_millis(),
            created_by: identity.uid.clone(),
            email,
        })
        .await?;
    info!("Admin {} granted by {}", record.uid, identity.uid);
    Ok(Json(record))
}

pub async fn admins_remove_handler(
    identity: Identity,
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &identity).await?;
    state.store.remove_admin(&uid).await?;
    info!("Admin {} removed by {}", uid, identity.uid);
    Ok(Json(json!({ "ok": true })))
}
