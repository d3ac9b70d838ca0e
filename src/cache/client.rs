// src/cache/client.rs

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::debug;

use crate::bidding::bidder_client::shared_client;
use crate::error::CacheError;
use crate::model::{Bid, MediaType};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PutType {
    Json,
    Xml,
}

/// 单条缓存内容
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PutObject {
    #[serde(rename = "type")]
    pub put_type: PutType,
    pub value: Value,
}

impl PutObject {
    /// banner 缓存为 json `{adm, width, height}`，video 缓存为 xml 片段
    pub fn from_bid(bid: &Bid) -> Self {
        match bid.media_type {
            MediaType::Banner => PutObject {
                put_type: PutType::Json,
                value: json!({
                    "adm": bid.adm,
                    "width": bid.width,
                    "height": bid.height,
                }),
            },
            MediaType::Video => PutObject {
                put_type: PutType::Xml,
                value: Value::String(bid.adm.clone().unwrap_or_default()),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BidCacheRequest {
    pub puts: Vec<PutObject>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheObject {
    pub uuid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BidCacheResponse {
    pub responses: Vec<CacheObject>,
}

/// **缓存服务契约**
///
/// 返回的 id 与 `puts` 一一对应、顺序一致。
pub trait CacheClient: Send + Sync {
    fn store<'a>(&'a self, puts: Vec<PutObject>, timeout: Duration) -> BoxFuture<'a, Result<Vec<String>, CacheError>>;
}

pub struct HttpCacheClient {
    client: Client,
    endpoint: String,
}

impl HttpCacheClient {
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(shared_client(), endpoint)
    }

    pub fn with_client(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

impl CacheClient for HttpCacheClient {
    fn store<'a>(&'a self, puts: Vec<PutObject>, timeout: Duration) -> BoxFuture<'a, Result<Vec<String>, CacheError>> {
        async move {
            let expected = puts.len();
            let response = self
                .client
                .post(&self.endpoint)
                .timeout(timeout)
                .json(&BidCacheRequest { puts })
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;

            let body: BidCacheResponse = response
                .json()
                .await
                .map_err(|e| CacheError::Unavailable(format!("invalid cache response: {}", e)))?;

            if body.responses.len() != expected {
                return Err(CacheError::CountMismatch {
                    expected,
                    returned: body.responses.len(),
                });
            }
            debug!(endpoint = %self.endpoint, stored = expected, "bids cached");
            Ok(body.responses.into_iter().map(|o| o.uuid).collect())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_and_video_put_objects() {
        let banner = Bid {
            adm: Some("<div/>".into()),
            width: Some(300),
            height: Some(250),
            ..Default::default()
        };
        let put = PutObject::from_bid(&banner);
        assert_eq!(
            serde_json::to_value(&put).unwrap(),
            json!({ "type": "json", "value": { "adm": "<div/>", "width": 300, "height": 250 } })
        );

        let video = Bid {
            adm: Some("<VAST/>".into()),
            media_type: MediaType::Video,
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(PutObject::from_bid(&video)).unwrap(),
            json!({ "type": "xml", "value": "<VAST/>" })
        );
    }

    #[tokio::test]
    async fn unreachable_cache_is_unavailable() {
        // 端口 9 上没有服务，连接被拒绝
        let client = HttpCacheClient::new("http://127.0.0.1:9/cache");
        let put = PutObject::from_bid(&Bid {
            adm: Some("<div/>".into()),
            ..Default::default()
        });
        let err = client.store(vec![put], Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[test]
    fn cache_response_shape() {
        let parsed: BidCacheResponse =
            serde_json::from_str(r#"{"responses":[{"uuid":"a"},{"uuid":"b"}]}"#).unwrap();
        assert_eq!(parsed.responses.len(), 2);
        assert_eq!(parsed.responses[1].uuid, "b");
    }
}
