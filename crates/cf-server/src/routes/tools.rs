//! External tool availability.

use axum::extract::State;
use axum::Json;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /api/tools
pub async fn tools(State(ctx): State<AppContext>) -> Result<Json<Vec<cf_av::ToolInfo>>, AppError> {
    // Version detection runs each tool synchronously.
    let tools = ctx.tools.clone();
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .map_err(|e| cf_core::Error::Internal(format!("tool check panicked: {e}")))?;
    Ok(Json(infos))
}
