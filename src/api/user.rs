use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, AppState};
use crate::account::{Account, AccountSource};
use crate::token::Claims;
use crate::utils::StoreError;
use crate::v2ray::{build_client_config, ConfigDocument};

#[derive(Debug, Deserialize)]
pub struct AccountPatch {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub clients: usize,
    pub path: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct AccountUpdated {
    pub account: Account,
    pub sync: SyncSummary,
}

fn bearer_claims(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    Ok(state.signer.decode(token.trim())?)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let claims = bearer_claims(state, headers)?;
    if !claims.admin {
        return Err(ApiError::Forbidden);
    }
    Ok(claims)
}

/// 当前 token 对应账户的客户端配置; 停用账户同样下发
pub async fn client_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConfigDocument>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    let account = state
        .store
        .get_account(&claims.sub)
        .await?
        .ok_or(StoreError::NotFound(claims.sub))?;

    Ok(Json(build_client_config(&account, &state.deployment)))
}

/// 修改启用状态并立即重新同步服务端配置
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<AccountPatch>,
) -> Result<Json<AccountUpdated>, ApiError> {
    let admin = require_admin(&state, &headers)?;

    let account = state.store.set_enabled(&id, patch.enabled).await?;
    info!(account = %id, enabled = patch.enabled, by = %admin.sub, "账户状态已变更");

    let report = state.synchronizer.sync().await?;
    Ok(Json(AccountUpdated {
        account,
        sync: SyncSummary {
            clients: report.clients,
            path: report.path.display().to_string(),
            elapsed_ms: report.elapsed.as_millis() as u64,
        },
    }))
}

pub async fn sync_now(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SyncSummary>, ApiError> {
    require_admin(&state, &headers)?;

    let report = state.synchronizer.sync().await?;
    Ok(Json(SyncSummary {
        clients: report.clients,
        path: report.path.display().to_string(),
        elapsed_ms: report.elapsed.as_millis() as u64,
    }))
}
