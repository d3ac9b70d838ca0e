// src/bidding/bidder_client.rs

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use reqwest::Client;
use tokio::time::Duration;

use crate::error::BidderError;
use crate::model::HttpRequest;
use crate::openrtb::response::BidResponse;

/// 进程内共享的 reqwest 客户端（连接池复用）
static SHARED_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// 所有出站调用（bidder 与缓存）共用同一个连接池
pub(crate) fn shared_client() -> Client {
    SHARED_CLIENT.clone()
}

/// bidder 原始响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// 出站 HTTP 调用的抽象，测试中可替换为假实现
pub trait HttpClient: Send + Sync {
    fn post<'a>(
        &'a self,
        request: &'a HttpRequest,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<HttpResponse, BidderError>>;
}

pub struct ReqwestHttpClient {
    client: Client,
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self {
            client: shared_client(),
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn post<'a>(
        &'a self,
        request: &'a HttpRequest,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<HttpResponse, BidderError>> {
        async move {
            let body = serde_json::to_vec(&request.body)
                .map_err(|e| BidderError::Transport(format!("failed to encode bid request: {}", e)))?;

            let mut builder = self.client.post(&request.uri).timeout(timeout).body(body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    BidderError::Timeout(timeout.as_millis() as u64)
                } else {
                    BidderError::Transport(e.to_string())
                }
            })?;
            let status = response.status().as_u16();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| BidderError::Transport(format!("failed to read response body: {}", e)))?;

            Ok(HttpResponse {
                status,
                body: bytes.to_vec(),
            })
        }
        .boxed()
    }
}

/// 解析 bidder 响应：204 或空 body 视为不出价，非 2xx 视为传输错误
pub fn decode_bid_response(response: &HttpResponse) -> Result<Option<BidResponse>, BidderError> {
    match response.status {
        204 => Ok(None),
        200..=299 if response.body.is_empty() => Ok(None),
        200..=299 => {
            let mut body = response.body.clone();
            simd_json::serde::from_slice::<BidResponse>(&mut body)
                .map(Some)
                .map_err(|e| BidderError::Transport(format!("failed to decode bid response: {}", e)))
        }
        status => Err(BidderError::Transport(format!("unexpected HTTP status {}", status))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse { status, body: body.as_bytes().to_vec() }
    }

    #[test]
    fn no_content_is_no_bid() {
        assert_eq!(decode_bid_response(&response(204, "")), Ok(None));
        assert_eq!(decode_bid_response(&response(200, "")), Ok(None));
    }

    #[test]
    fn decodes_ok_body() {
        let decoded = decode_bid_response(&response(
            200,
            r#"{"id":"r","seatbid":[{"bid":[{"id":"1","impid":"a","price":2.5}]}]}"#,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(decoded.bids().next().map(|b| b.price), Some(2.5));
    }

    #[test]
    fn error_status_and_garbage_are_transport_errors() {
        assert_eq!(
            decode_bid_response(&response(503, "")),
            Err(BidderError::Transport("unexpected HTTP status 503".into()))
        );
        assert!(matches!(
            decode_bid_response(&response(200, "not json")),
            Err(BidderError::Transport(_))
        ));
    }
}
