use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/models", get(list_models))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_models(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .cfg
        .models
        .iter()
        .map(|model| {
            let selection = model.selection();
            let provider = selection.provider().ok().map(|p| p.as_str());
            let supports_image_input = state
                .assistant
                .capabilities(&selection)
                .map(|c| c.supports_image_input)
                .unwrap_or(false);
            serde_json::json!({
                "label": model.label,
                "id": model.id,
                "provider": provider,
                "supports_image_input": supports_image_input,
            })
        })
        .collect();

    Json(serde_json::json!({
        "default_model": state.cfg.general.default_model,
        "models": models,
    }))
}
