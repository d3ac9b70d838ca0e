// src/mock_bidder.rs

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{serve, Json, Router};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tracing::info;
use uuid::Uuid;

use crate::cache::{BidCacheRequest, BidCacheResponse};
use crate::cache::client::CacheObject;
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::{Bid, BidResponse, SeatBid};

/// 本地联调用的 bidder：随机延迟、随机出价，约三成请求不出价
async fn handle_bid(Json(request): Json<BidRequest>) -> Result<Json<BidResponse>, StatusCode> {
    info!(tid = %request.id, imp_count = request.imp.len(), "mock bidder received request");

    let (delay_ms, no_bid) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(50..250), rng.gen_bool(0.3))
    };
    sleep(Duration::from_millis(delay_ms)).await;
    if no_bid {
        return Err(StatusCode::NO_CONTENT);
    }

    let bids = request
        .imp
        .iter()
        .map(|imp| {
            let floor = imp.bidfloor.unwrap_or(0.5).max(0.01);
            let (price, adm, w, h) = match (&imp.banner, &imp.video) {
                (Some(banner), _) => (
                    floor * rand::thread_rng().gen_range(1.0..3.0),
                    format!("<html><body>Mock banner for {}</body></html>", imp.id),
                    banner.w,
                    banner.h,
                ),
                (None, Some(video)) => (
                    floor * rand::thread_rng().gen_range(1.0..2.5),
                    format!(
                        r#"<VAST version="3.0"><Ad id="{}"><InLine><AdSystem>Mock Bidder</AdSystem></InLine></Ad></VAST>"#,
                        imp.id
                    ),
                    video.w,
                    video.h,
                ),
                (None, None) => (floor, String::new(), None, None),
            };
            Bid {
                id: format!("bid-{}", imp.id),
                impid: imp.id.clone(),
                price: (price * 100.0).round() / 100.0,
                adm: Some(adm),
                crid: Some(format!("creative-{}", imp.id)),
                w,
                h,
                ..Default::default()
            }
        })
        .collect();

    Ok(Json(BidResponse {
        id: request.id.clone(),
        seatbid: Some(vec![SeatBid {
            bid: bids,
            seat: Some("mock_seat".to_string()),
            group: Some(0),
        }]),
        cur: Some("USD".to_string()),
        ..Default::default()
    }))
}

type CacheStore = Arc<Mutex<HashMap<String, Value>>>;

async fn handle_cache_put(State(store): State<CacheStore>, Json(request): Json<BidCacheRequest>) -> Json<BidCacheResponse> {
    let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
    let responses = request
        .puts
        .into_iter()
        .map(|put| {
            let uuid = Uuid::new_v4().to_string();
            store.insert(uuid.clone(), put.value);
            CacheObject { uuid }
        })
        .collect();
    Json(BidCacheResponse { responses })
}

#[derive(Deserialize)]
struct CacheQuery {
    uuid: String,
}

async fn handle_cache_get(State(store): State<CacheStore>, Query(query): Query<CacheQuery>) -> Result<Json<Value>, StatusCode> {
    let store = store.lock().unwrap_or_else(PoisonError::into_inner);
    store.get(&query.uuid).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub fn router() -> Router {
    let store: CacheStore = Arc::default();
    Router::new()
        .route("/bid", post(handle_bid))
        .route("/cache", post(handle_cache_put).get(handle_cache_get))
        .with_state(store)
}

/// 启动 mock bidder + mock cache，路由为 `/bid` 与 `/cache`
pub async fn start_mock_server(port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Mock bidder running at http://{}", addr);
    serve(listener, router()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{PutObject, PutType};
    use crate::openrtb::request::{Banner, Imp};

    #[tokio::test]
    async fn bids_cover_every_imp_or_no_content() {
        let request = BidRequest {
            id: "tid".into(),
            imp: vec![Imp {
                id: "top".into(),
                banner: Some(Banner { w: Some(300), h: Some(250), ..Default::default() }),
                bidfloor: Some(1.0),
                ..Default::default()
            }],
            ..Default::default()
        };
        match handle_bid(Json(request)).await {
            Ok(Json(response)) => {
                let bids: Vec<_> = response.bids().collect();
                assert_eq!(bids.len(), 1);
                assert_eq!(bids[0].impid, "top");
                assert!(bids[0].price >= 1.0);
            }
            Err(status) => assert_eq!(status, StatusCode::NO_CONTENT),
        }
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let store: CacheStore = Arc::default();
        let put = BidCacheRequest {
            puts: vec![PutObject { put_type: PutType::Xml, value: Value::String("<VAST/>".into()) }],
        };
        let Json(stored) = handle_cache_put(State(store.clone()), Json(put)).await;
        assert_eq!(stored.responses.len(), 1);

        let uuid = stored.responses[0].uuid.clone();
        let Json(value) = handle_cache_get(State(store.clone()), Query(CacheQuery { uuid })).await.unwrap();
        assert_eq!(value, Value::String("<VAST/>".into()));
        assert!(handle_cache_get(State(store), Query(CacheQuery { uuid: "missing".into() })).await.is_err());
    }
}
