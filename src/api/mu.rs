//! mu 接口: 供 shadowsocks 多用户管理端拉取用户并上报流量

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ApiError, AppState};
use crate::account::AccountSource;
use crate::utils::{constant_time_eq, unix_millis};

/// 下发给管理端的固定流量额度 (字节)
pub const TRANSFER_ENABLE: u64 = 200_000_000;

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MuUser {
    pub id: String,
    pub email: String,
    pub passwd: String,
    /// 最近一次上报时间 (毫秒)
    pub t: u64,
    pub u: u64,
    pub d: u64,
    pub transfer_enable: u64,
    pub port: u16,
    pub switch: u8,
    pub enable: u8,
    pub method: String,
}

#[derive(Debug, Serialize)]
pub struct MuUsers {
    pub msg: &'static str,
    pub data: Vec<MuUser>,
}

/// 上报的 u/d 原样保留: 管理端可能发数字, 也可能发字符串
#[derive(Debug, Default, Deserialize)]
pub struct TrafficReport {
    #[serde(default)]
    pub u: Value,
    #[serde(default)]
    pub d: Value,
}

impl TrafficReport {
    /// u 与 d 各自按真值判断, 任一为真即视为有效上报
    pub fn has_traffic(&self) -> bool {
        truthy(&self.u) || truthy(&self.d)
    }
}

/// null, false, 0 和空串为假, 其余 (包括字符串 "0") 为真
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Serialize)]
pub struct MuAck {
    pub ret: u8,
    pub msg: &'static str,
}

/// `token` 请求头优先, 其次 `key` 查询参数
fn authorize(headers: &HeaderMap, query: &KeyQuery, expected: &str) -> Result<(), ApiError> {
    let provided = headers
        .get("token")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .or(query.key.as_deref());

    match provided {
        Some(p) if constant_time_eq(p.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Result<Json<MuUsers>, ApiError> {
    authorize(&headers, &query, &state.mu_token)?;

    let data = state
        .store
        .list_accounts()
        .await?
        .into_iter()
        .map(|a| {
            let flag = u8::from(a.enabled);
            MuUser {
                id: a.id,
                email: a.email,
                passwd: a.shadowsocks.password,
                t: a.updated_at,
                u: 0,
                d: 0,
                transfer_enable: TRANSFER_ENABLE,
                port: a.shadowsocks.port,
                switch: flag,
                enable: flag,
                method: a.shadowsocks.method,
            }
        })
        .collect();

    Ok(Json(MuUsers { msg: "ok", data }))
}

pub async fn report_traffic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
    body: Bytes,
) -> Result<Json<MuAck>, ApiError> {
    authorize(&headers, &query, &state.mu_token)?;

    if state.store.get_account(&id).await?.is_none() {
        return Err(crate::utils::StoreError::NotFound(id).into());
    }

    let report = parse_report(&headers, &body);
    if !report.has_traffic() {
        return Err(ApiError::BadRequest("缺少流量数据 u/d".to_string()));
    }

    state.store.touch(&id, unix_millis()).await?;
    debug!(account = %id, u = %report.u, d = %report.d, "收到流量上报");

    Ok(Json(MuAck { ret: 1, msg: "ok" }))
}

/// 管理端可能发 JSON, 也可能发表单; 无法解析时视为空上报
fn parse_report(headers: &HeaderMap, body: &[u8]) -> TrafficReport {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        return serde_json::from_slice(body).unwrap_or_default();
    }

    let mut form: HashMap<String, String> = serde_urlencoded::from_bytes(body).unwrap_or_default();
    TrafficReport {
        u: form.remove("u").map(Value::String).unwrap_or_default(),
        d: form.remove("d").map(Value::String).unwrap_or_default(),
    }
}
