use std::sync::Arc;

use axum::{
    Form, Json,
    body::{Body, to_bytes},
    extract::{FromRequest, Path, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::api::{self, Page, QueryParams};
use crate::db::Database;
use crate::model::SettingKey;
use crate::sync::{self, Syncer};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub syncer: Arc<Syncer>,
}

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug)]
pub struct HandlerParams {
    pub page: u32,
    pub limit: u32,
    pub offset: u32,
}

impl QueryParams {
    pub fn into_handler_params(self) -> HandlerParams {
        let page = self.page.unwrap_or(DEFAULT_PAGE).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, DEFAULT_LIMIT);

        HandlerParams {
            page,
            limit,
            offset: (page - 1) * limit,
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(Health { status: "ok" })
}

// ============================================================================
// Sync
// ============================================================================

const MAX_SYNC_BODY: usize = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "fetchAll", default, deserialize_with = "flag")]
    pub fetch_all: bool,
}

// Form posts only carry strings, so "true"/"false" and 1/0 are accepted too.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => Ok(b),
        Raw::Int(1) => Ok(true),
        Raw::Int(0) => Ok(false),
        Raw::Str(s) => match s.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "fetchAll must be true or false, got {:?}",
                other
            ))),
        },
        Raw::Int(n) => Err(serde::de::Error::custom(format!(
            "fetchAll must be true or false, got {}",
            n
        ))),
    }
}

/// Reads the trigger body as JSON or as a urlencoded form. No body means an incremental sync.
async fn read_sync_request(req: Request) -> Result<SyncRequest, Response> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_SYNC_BODY)
        .await
        .map_err(|e| api::bad_request(&format!("unreadable request body: {}", e)))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(SyncRequest::default());
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let req = Request::from_parts(parts, Body::from(bytes));

    if content_type.starts_with("application/x-www-form-urlencoded") {
        Form::<SyncRequest>::from_request(req, &())
            .await
            .map(|Form(r)| r)
            .map_err(|e| api::bad_request(&e.body_text()))
    } else {
        Json::<SyncRequest>::from_request(req, &())
            .await
            .map(|Json(r)| r)
            .map_err(|e| api::bad_request(&e.body_text()))
    }
}

pub async fn trigger_sync(State(state): State<AppState>, request: Request) -> Response {
    let req = match read_sync_request(request).await {
        Ok(req) => req,
        Err(rejection) => {
            tracing::info!("rejected sync request with a malformed body");
            return rejection;
        }
    };
    info!(fetch_all = req.fetch_all, "got sync request");

    match state.syncer.run(req.fetch_all).await {
        Ok(report) => api::success(report),
        Err(e) => api::sync_error(&e),
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings as shown to callers. The access token itself never leaves the store.
#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub has_access_token: bool,
    pub time_last_checked: Option<String>,
    pub new_name_sets: String,
    pub user_added_tags: String,
    pub user_removed_tags: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub readwise_access_token: Option<String>,
    pub time_last_checked: Option<String>,
    pub new_name_sets: Option<String>,
    pub user_added_tags: Option<String>,
    pub user_removed_tags: Option<String>,
}

impl SettingsUpdate {
    fn changes(self) -> Vec<(SettingKey, String)> {
        [
            (SettingKey::AccessToken, self.readwise_access_token),
            (SettingKey::TimeLastChecked, self.time_last_checked),
            (SettingKey::NewNameSets, self.new_name_sets),
            (SettingKey::UserAddedTags, self.user_added_tags),
            (SettingKey::UserRemovedTags, self.user_removed_tags),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }
}

async fn load_settings(db: &Database) -> anyhow::Result<SettingsView> {
    let token = db.get_setting(SettingKey::AccessToken).await?;

    Ok(SettingsView {
        has_access_token: token.is_some_and(|t| !t.trim().is_empty()),
        time_last_checked: db.get_setting(SettingKey::TimeLastChecked).await?,
        new_name_sets: db.get_setting(SettingKey::NewNameSets).await?.unwrap_or_default(),
        user_added_tags: db.get_setting(SettingKey::UserAddedTags).await?.unwrap_or_default(),
        user_removed_tags: db.get_setting(SettingKey::UserRemovedTags).await?.unwrap_or_default(),
    })
}

pub async fn get_settings(State(state): State<AppState>) -> Response {
    match load_settings(&state.db).await {
        Ok(view) => api::success(view),
        Err(e) => {
            tracing::error!("Failed to load settings: {}", e);
            api::internal_error("failed to load settings")
        }
    }
}

pub async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    let changes = update.changes();

    for (key, value) in &changes {
        if let Err(e) = sync::validate_setting(*key, value) {
            return api::bad_request(&e.to_string());
        }
    }

    for (key, value) in &changes {
        if let Err(e) = state.db.set_setting(*key, value).await {
            tracing::error!("Failed to save setting {}: {}", key.as_str(), e);
            return api::internal_error("failed to save settings");
        }
        info!(key = key.as_str(), "updated setting");
    }

    get_settings(State(state)).await
}

// ============================================================================
// Entries
// ============================================================================

pub async fn list_entries(State(state): State<AppState>, Query(qp): Query<QueryParams>) -> Response {
    let hp = qp.into_handler_params();

    let items = match state.db.list_entries(&hp).await {
        Ok(items) => items,
        Err(e) => {
            tracing::error!("Failed to list entries: {}", e);
            return api::internal_error("failed to list entries");
        }
    };
    let total = match state.db.count_entries().await {
        Ok(total) => total,
        Err(e) => {
            tracing::error!("Failed to count entries: {}", e);
            return api::internal_error("failed to list entries");
        }
    };

    api::success(Page {
        items,
        page: hp.page,
        limit: hp.limit,
        total,
    })
}

pub async fn get_entry(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.db.get_entry(id).await {
        Ok(Some(entry)) => api::success(entry),
        Ok(None) => api::error(StatusCode::NOT_FOUND, "entry not found"),
        Err(e) => {
            tracing::error!("Failed to get entry {}: {}", id, e);
            api::internal_error("failed to get entry")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let hp = QueryParams {
            page: Some(0),
            limit: Some(500),
        }
        .into_handler_params();
        assert_eq!((hp.page, hp.limit, hp.offset), (1, 50, 0));

        let hp = QueryParams {
            page: Some(3),
            limit: Some(10),
        }
        .into_handler_params();
        assert_eq!((hp.page, hp.limit, hp.offset), (3, 10, 20));
    }

    #[test]
    fn fetch_all_accepts_strings_and_numbers() {
        let parse = |body: &str| serde_json::from_str::<SyncRequest>(body).map(|r| r.fetch_all);
        assert!(parse(r#"{"fetchAll":true}"#).unwrap());
        assert!(parse(r#"{"fetchAll":"true"}"#).unwrap());
        assert!(!parse(r#"{"fetchAll":"false"}"#).unwrap());
        assert!(parse(r#"{"fetchAll":1}"#).unwrap());
        assert!(!parse(r#"{}"#).unwrap());
        assert!(parse(r#"{"fetchAll":"yes"}"#).is_err());
        assert!(parse(r#"{"fetchAll":2}"#).is_err());
    }

    #[test]
    fn settings_update_keeps_only_present_fields() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"user_added_tags":"quotes","new_name_sets":""}"#).unwrap();
        let keys: Vec<_> = update.changes().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![SettingKey::NewNameSets, SettingKey::UserAddedTags]);
    }
}
