// src/bidding/invoker.rs

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::adapters::Adapter;
use crate::bidding::bidder_client::{decode_bid_response, HttpClient};
use crate::bidding::breaker::CircuitBreaker;
use crate::error::{BidderError, ErrorKind};
use crate::model::{
    AdapterRequest, Bid, BidderDebug, BidderErrorInfo, BidderStatus, ExchangeCall, HttpRequest,
    PreBidRequestContext,
};

/// 单个 bidder 在一场竞价中的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum BidderOutcome {
    Bids(Vec<Bid>),
    NoBid,
    Error(BidderError),
    Timeout,
    CircuitOpen,
}

impl BidderOutcome {
    pub fn from_error(error: BidderError) -> Self {
        match error {
            BidderError::Timeout(_) => BidderOutcome::Timeout,
            BidderError::CircuitOpen(_) => BidderOutcome::CircuitOpen,
            other => BidderOutcome::Error(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BidderOutcome::Bids(_) => "bids",
            BidderOutcome::NoBid => "no_bid",
            BidderOutcome::Error(_) => "error",
            BidderOutcome::Timeout => "timeout",
            BidderOutcome::CircuitOpen => "circuit_open",
        }
    }

    pub fn num_bids(&self) -> usize {
        match self {
            BidderOutcome::Bids(bids) => bids.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResult {
    pub bidder: String,
    pub outcome: BidderOutcome,
    pub response_time_ms: u64,
    pub debug: Vec<BidderDebug>,
}

impl AdapterResult {
    pub fn new(bidder: &str, outcome: BidderOutcome, response_time_ms: u64, debug: Vec<BidderDebug>) -> Self {
        Self {
            bidder: bidder.to_string(),
            outcome,
            response_time_ms,
            debug,
        }
    }

    /// 转换成响应调试部分中的 bidder 状态
    pub fn status(&self) -> BidderStatus {
        let error = match &self.outcome {
            BidderOutcome::Error(e) => Some(BidderErrorInfo {
                kind: e.kind(),
                message: e.to_string(),
            }),
            BidderOutcome::Timeout => Some(BidderErrorInfo {
                kind: ErrorKind::Timeout,
                message: format!("timed out after {}ms", self.response_time_ms),
            }),
            BidderOutcome::CircuitOpen => Some(BidderErrorInfo {
                kind: ErrorKind::CircuitOpen,
                message: format!("circuit breaker is open for bidder '{}'", self.bidder),
            }),
            BidderOutcome::Bids(_) | BidderOutcome::NoBid => None,
        };
        BidderStatus {
            bidder: self.bidder.clone(),
            outcome: self.outcome.label().to_string(),
            num_bids: self.outcome.num_bids(),
            error,
            response_time_ms: Some(self.response_time_ms),
            debug: self.debug.clone(),
        }
    }
}

/// **单个 bidder 的调用入口**
///
/// 构造请求 → 在熔断器保护下并发发送 → 提取出价。任何失败都收敛为该 bidder 的 outcome，
/// 不会向上抛出。
#[derive(Clone)]
pub struct AdapterInvoker {
    adapter: Arc<dyn Adapter>,
    breaker: CircuitBreaker,
    client: Arc<dyn HttpClient>,
}

impl AdapterInvoker {
    pub fn new(adapter: Arc<dyn Adapter>, breaker: CircuitBreaker, client: Arc<dyn HttpClient>) -> Self {
        Self { adapter, breaker, client }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub async fn invoke(
        &self,
        request: &AdapterRequest,
        context: &PreBidRequestContext,
        budget: Duration,
    ) -> AdapterResult {
        let started = Instant::now();
        let bidder = self.adapter.name();

        let http_requests = match self.adapter.build_requests(request, context) {
            Ok(requests) => requests,
            Err(e) => {
                warn!(tid = %context.tid, bidder, error = %e, "failed to build bidder requests");
                return AdapterResult::new(bidder, BidderOutcome::from_error(e), elapsed_ms(started), Vec::new());
            }
        };

        let calls = self
            .breaker
            .execute(|| self.send_all(&http_requests, budget, context))
            .await;

        let (outcome, debug) = match calls {
            Ok(calls) => {
                let debug = calls.iter().map(|call| call.debug.clone()).collect();
                (self.collect_bids(request, &calls), debug)
            }
            Err(e) => (BidderOutcome::from_error(e), Vec::new()),
        };

        let response_time_ms = elapsed_ms(started);
        debug!(
            tid = %context.tid,
            bidder,
            outcome = outcome.label(),
            num_bids = outcome.num_bids(),
            response_time_ms,
            "bidder finished"
        );
        AdapterResult::new(bidder, outcome, response_time_ms, debug)
    }

    fn collect_bids(&self, request: &AdapterRequest, calls: &[ExchangeCall]) -> BidderOutcome {
        let mut bids = Vec::new();
        for call in calls {
            match self.adapter.extract_bids(request, call) {
                Ok(extracted) => bids.extend(extracted),
                Err(e) => return BidderOutcome::Error(e),
            }
        }
        if bids.is_empty() {
            BidderOutcome::NoBid
        } else {
            BidderOutcome::Bids(bids)
        }
    }

    /// 并发发送全部请求；全部失败时返回第一个错误，部分失败时只保留成功的调用
    async fn send_all(
        &self,
        requests: &[HttpRequest],
        budget: Duration,
        context: &PreBidRequestContext,
    ) -> Result<Vec<ExchangeCall>, BidderError> {
        let results = join_all(requests.iter().map(|request| self.send(request, budget, context.is_debug))).await;

        let mut calls = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(call) => calls.push(call),
                Err(e) => {
                    warn!(tid = %context.tid, bidder = self.adapter.name(), error = %e, "bidder call failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if calls.is_empty() => Err(e),
            _ => Ok(calls),
        }
    }

    async fn send(&self, request: &HttpRequest, budget: Duration, is_debug: bool) -> Result<ExchangeCall, BidderError> {
        let started = Instant::now();
        let response = timeout(budget, self.client.post(request, budget))
            .await
            .map_err(|_| BidderError::Timeout(budget.as_millis() as u64))??;

        let mut debug = BidderDebug {
            request_uri: request.uri.clone(),
            status_code: Some(response.status),
            response_time_ms: elapsed_ms(started),
            ..Default::default()
        };
        if is_debug {
            debug.request_body = serde_json::to_string(&request.body).ok();
            debug.response_body = Some(String::from_utf8_lossy(&response.body).into_owned());
        }

        Ok(match decode_bid_response(&response)? {
            Some(bid_response) => ExchangeCall::success(request.body.clone(), bid_response, debug),
            None => ExchangeCall {
                request: Some(request.body.clone()),
                response: None,
                debug,
            },
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidding::bidder_client::HttpResponse;
    use crate::bidding::breaker::{CircuitBreakerConfig, CircuitState, ManualClock};
    use crate::model::{AdUnitBid, MediaType};
    use crate::openrtb::request::BidRequest;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    struct EchoAdapter {
        requests: usize,
    }

    impl Adapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }

        fn build_requests(
            &self,
            request: &AdapterRequest,
            context: &PreBidRequestContext,
        ) -> Result<Vec<HttpRequest>, BidderError> {
            if request.ad_unit_bids.is_empty() {
                return Err(BidderError::InvalidParameters("no units".into()));
            }
            Ok((0..self.requests)
                .map(|i| HttpRequest {
                    uri: format!("http://echo/{}", i),
                    headers: BTreeMap::new(),
                    body: BidRequest { id: context.tid.clone(), ..Default::default() },
                })
                .collect())
        }

        fn extract_bids(&self, request: &AdapterRequest, call: &ExchangeCall) -> Result<Vec<Bid>, BidderError> {
            crate::adapters::openrtb::extract_bids(request, call)
        }
    }

    /// 按 uri 返回预设响应
    struct ScriptedClient {
        responses: Mutex<BTreeMap<String, Result<HttpResponse, BidderError>>>,
    }

    impl HttpClient for ScriptedClient {
        fn post<'a>(
            &'a self,
            request: &'a HttpRequest,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<HttpResponse, BidderError>> {
            let result = self
                .responses
                .lock()
                .unwrap()
                .get(&request.uri)
                .cloned()
                .unwrap_or(Ok(HttpResponse { status: 204, body: vec![] }));
            async move { result }.boxed()
        }
    }

    fn bid_body(impid: &str, price: f64) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: format!(
                r#"{{"id":"r","seatbid":[{{"bid":[{{"id":"x","impid":"{}","price":{}}}]}}]}}"#,
                impid, price
            )
            .into_bytes(),
        }
    }

    fn invoker(requests: usize, responses: Vec<(&str, Result<HttpResponse, BidderError>)>, threshold: u32) -> AdapterInvoker {
        let (tx, _) = broadcast::channel(16);
        let breaker = CircuitBreaker::new(
            "echo",
            CircuitBreakerConfig { opening_threshold: threshold, ..Default::default() },
            Arc::new(ManualClock::new(0)),
            tx,
        );
        let client = ScriptedClient {
            responses: Mutex::new(responses.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
        };
        AdapterInvoker::new(Arc::new(EchoAdapter { requests }), breaker, Arc::new(client))
    }

    fn request() -> AdapterRequest {
        AdapterRequest::new(
            "echo",
            vec![AdUnitBid {
                bidder_code: "echo".into(),
                bid_id: "b1".into(),
                ad_unit_code: "slot".into(),
                media_types: BTreeSet::from([MediaType::Banner]),
                ..Default::default()
            }],
        )
    }

    fn context() -> PreBidRequestContext {
        PreBidRequestContext { tid: "tid".into(), timeout_millis: 500, ..Default::default() }
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_bids() {
        let invoker = invoker(
            2,
            vec![
                ("http://echo/0", Ok(bid_body("slot", 1.25))),
                ("http://echo/1", Err(BidderError::Transport("reset".into()))),
            ],
            5,
        );
        let result = invoker.invoke(&request(), &context(), Duration::from_millis(500)).await;
        assert_eq!(result.outcome.num_bids(), 1);
        assert_eq!(result.debug.len(), 1);
        assert_eq!(invoker.breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn total_failure_trips_breaker_then_short_circuits() {
        let invoker = invoker(1, vec![("http://echo/0", Err(BidderError::Transport("refused".into())))], 1);
        let first = invoker.invoke(&request(), &context(), Duration::from_millis(500)).await;
        assert_eq!(first.outcome, BidderOutcome::Error(BidderError::Transport("refused".into())));
        assert_eq!(first.status().error.map(|e| e.kind), Some(ErrorKind::TransportError));
        assert_eq!(invoker.breaker.state(), CircuitState::Open);

        let second = invoker.invoke(&request(), &context(), Duration::from_millis(500)).await;
        assert_eq!(second.outcome, BidderOutcome::CircuitOpen);
        assert_eq!(second.status().outcome, "circuit_open");
    }

    #[tokio::test]
    async fn no_content_and_unknown_codes() {
        let empty = invoker(1, vec![], 5);
        let result = empty.invoke(&request(), &context(), Duration::from_millis(500)).await;
        assert_eq!(result.outcome, BidderOutcome::NoBid);
        assert!(result.status().error.is_none());

        let stray = invoker(1, vec![("http://echo/0", Ok(bid_body("elsewhere", 2.0)))], 5);
        let result = stray.invoke(&request(), &context(), Duration::from_millis(500)).await;
        assert_eq!(
            result.status().error.map(|e| e.kind),
            Some(ErrorKind::UnknownAdUnitCode)
        );
    }

    #[tokio::test]
    async fn build_failure_is_reported_without_calls() {
        let invoker = invoker(1, vec![], 5);
        let empty_request = AdapterRequest::new("echo", vec![]);
        let result = invoker.invoke(&empty_request, &context(), Duration::from_millis(500)).await;
        assert_eq!(result.outcome, BidderOutcome::Error(BidderError::InvalidParameters("no units".into())));
        assert_eq!(invoker.breaker.failure_count(), 0);
    }
}
