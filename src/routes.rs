use axum::{
    Router,
    routing::{get, post},
};

use crate::handler::{self, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::healthcheck))
        .route("/sync", post(handler::trigger_sync))
        .route("/settings", get(handler::get_settings).put(handler::put_settings))
        .route("/entries", get(handler::list_entries))
        .route("/entries/:id", get(handler::get_entry))
}
