// src/api/handlers.rs

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::api::AppState;
use crate::error::AuctionError;
use crate::logging::LogLevel;
use crate::model::prebid::{ClientInfo, PreBidRequest, PreBidResponse};

/// **处理 `/auction` 竞价请求**
///
/// 单个 bidder 的失败只会出现在 bidder_status 中，只有请求本身不合法时才返回 400。
pub async fn handle_auction(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<PreBidRequest>,
) -> Result<Json<PreBidResponse>, (StatusCode, Json<Value>)> {
    let requests = request.adapter_requests().map_err(|e| bad_request(&state, e))?;
    let context = request.context(client_info(&headers, peer), &state.config.auction);
    let tid = context.tid.clone();
    let start_time = context.start_time;

    let result = state
        .coordinator
        .run_auction(requests, context)
        .await
        .map_err(|e| bad_request(&state, e))?;

    Ok(Json(PreBidResponse {
        tid,
        status: "OK".to_string(),
        bidder_status: result.bidder_status(),
        bids: result.bids,
        response_time_ms: start_time.elapsed().as_millis() as u64,
    }))
}

pub async fn handle_status() -> &'static str {
    "ok"
}

fn bad_request(state: &AppState, error: AuctionError) -> (StatusCode, Json<Value>) {
    warn!(error = %error, "rejected auction request");
    let runtime_logger = Arc::clone(&state.runtime_logger);
    let message = error.to_string();
    tokio::spawn(async move { runtime_logger.log(LogLevel::Warn, &message).await });
    (StatusCode::BAD_REQUEST, Json(json!({ "status": "error", "message": error.to_string() })))
}

/// 优先取 X-Forwarded-For 的第一个地址，否则使用对端地址
fn client_info(headers: &HeaderMap, peer: SocketAddr) -> ClientInfo {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let ip = header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|first| first.trim().to_string()))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string());

    ClientInfo {
        ip: Some(ip),
        ua: header_str(header::USER_AGENT.as_str()),
        referer: header_str(header::REFERER.as_str()),
    }
}
