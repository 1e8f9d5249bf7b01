//! 缓存管理处理器

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::infrastructure::cache::{CascadeReport, PatternInvalidation};
use crate::presentation::routes::AppState;
use crate::shared::{ApiResponse, AppResult};
use crate::validation_error;

/// 失效请求：`key`、`pattern`、`tag` 三选一
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub key: Option<String>,
    /// 与 `key` 一起使用，沿标签级联失效
    #[serde(default)]
    pub cascade: bool,
    pub pattern: Option<String>,
    pub tag: Option<String>,
}

/// 失效结果
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidateResponse {
    Key { key: String, deleted: bool },
    Cascade(CascadeReport),
    Pattern(PatternInvalidation),
    Tag(CascadeReport),
}

/// 命名空间的命中统计
#[instrument(skip(state))]
pub async fn get_cache_metrics(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> AppResult<Json<ApiResponse<BTreeMap<String, u64>>>> {
    let metrics = state.cache.get_metrics(&namespace).await?;
    Ok(Json(ApiResponse::success(metrics)))
}

/// 失效缓存条目
#[instrument(skip(state))]
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> AppResult<Json<ApiResponse<InvalidateResponse>>> {
    let response = match (request.key, request.pattern, request.tag) {
        (Some(key), None, None) if request.cascade => {
            InvalidateResponse::Cascade(state.cache.invalidate_with_cascade(&key).await?)
        }
        (Some(key), None, None) => {
            let deleted = state.cache.invalidate(&key).await?;
            InvalidateResponse::Key { key, deleted }
        }
        (None, Some(pattern), None) => {
            InvalidateResponse::Pattern(state.cache.invalidate_by_pattern(&pattern).await?)
        }
        (None, None, Some(tag)) => InvalidateResponse::Tag(state.cache.invalidate_tag(&tag).await?),
        _ => return Err(validation_error!("key、pattern、tag 必须且只能提供一个")),
    };

    info!("🧹 缓存失效完成: {:?}", response);
    Ok(Json(ApiResponse::success(response)))
}
