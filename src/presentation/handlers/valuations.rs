//! 估值处理器

use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::auth::AdmissionGrant;
use crate::business::domain::Valuation;
use crate::presentation::routes::AppState;
use crate::shared::{ApiResponse, AppResult};

/// 获取房产估值
#[instrument(skip(state, grant), fields(key_id = grant.api_key.id))]
pub async fn get_valuation(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
    Extension(grant): Extension<AdmissionGrant>,
) -> AppResult<Json<ApiResponse<Valuation>>> {
    let valuation = state.valuation.get_valuation(&property_id).await?;
    if valuation.stale {
        info!("📦 返回降级估值: property={}", property_id);
    }
    Ok(Json(ApiResponse::success(valuation)))
}

/// 删除某个房产的全部估值缓存
#[instrument(skip(state, grant), fields(key_id = grant.api_key.id))]
pub async fn invalidate_valuation_cache(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
    Extension(grant): Extension<AdmissionGrant>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let deleted = state.valuation.invalidate_property(&property_id).await?;
    Ok(Json(ApiResponse::success(json!({
        "property_id": property_id,
        "deleted": deleted,
    }))))
}
