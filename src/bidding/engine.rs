// src/bidding/engine.rs

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tracing::{info, warn};

use crate::adapters::AdapterRegistry;
use crate::bidding::bidder_client::HttpClient;
use crate::bidding::breaker::CircuitBreakers;
use crate::bidding::invoker::{AdapterInvoker, AdapterResult, BidderOutcome};
use crate::cache::{CacheClient, PutObject};
use crate::config::config_manager::{CacheMode, CacheSettings};
use crate::error::{AuctionError, BidderError, ErrorKind};
use crate::logging::{AuctionLog, RuntimeLogger};
use crate::model::{AdapterRequest, Bid, BidderStatus, PreBidRequestContext};

/// 一场竞价的结果
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionResult {
    /// 按广告位分组（请求顺序），组内按价格降序
    pub bids: Vec<Bid>,
    /// 每个 bidder 一个结果，按完成顺序，超时的排在最后
    pub bidder_results: Vec<AdapterResult>,
}

impl AuctionResult {
    pub fn bidder_status(&self) -> Vec<BidderStatus> {
        self.bidder_results.iter().map(AdapterResult::status).collect()
    }

    /// 没有出价的 bidder 及其失败类别，NoBid 的类别为 None
    pub fn non_bid_outcomes(&self) -> Vec<(&str, Option<ErrorKind>)> {
        self.bidder_results
            .iter()
            .filter(|r| !matches!(r.outcome, BidderOutcome::Bids(_)))
            .map(|r| (r.bidder.as_str(), r.status().error.map(|e| e.kind)))
            .collect()
    }
}

/// **竞价协调器**
///
/// 每个 bidder 一个 tokio 任务并发执行，整场竞价共用一个 tmax 截止时间；
/// 截止时仍未完成的任务被分离（不会被 abort），记为 Timeout。
pub struct ExchangeCoordinator {
    adapters: AdapterRegistry,
    breakers: Arc<CircuitBreakers>,
    client: Arc<dyn HttpClient>,
    cache: Option<(Arc<dyn CacheClient>, CacheSettings)>,
    runtime_logger: Option<Arc<RuntimeLogger>>,
}

impl ExchangeCoordinator {
    pub fn new(adapters: AdapterRegistry, breakers: Arc<CircuitBreakers>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            adapters,
            breakers,
            client,
            cache: None,
            runtime_logger: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheClient>, settings: CacheSettings) -> Self {
        self.cache = Some((cache, settings));
        self
    }

    pub fn with_runtime_logger(mut self, runtime_logger: Arc<RuntimeLogger>) -> Self {
        self.runtime_logger = Some(runtime_logger);
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub async fn run_auction(
        &self,
        requests: Vec<AdapterRequest>,
        context: PreBidRequestContext,
    ) -> Result<AuctionResult, AuctionError> {
        if context.tid.is_empty() {
            return Err(AuctionError::InvalidContext("tid must not be empty".into()));
        }
        if context.timeout_millis == 0 {
            return Err(AuctionError::InvalidContext("tmax must be greater than 0".into()));
        }

        let started = Instant::now();
        let tmax = Duration::from_millis(context.timeout_millis);
        let deadline = started + tmax;
        let code_order = code_order(&requests);
        let context = Arc::new(context);

        let names: Vec<String> = requests.iter().map(|r| r.bidder_code.clone()).collect();
        let mut results: Vec<Option<AdapterResult>> = vec![None; requests.len()];
        let mut completed = Vec::with_capacity(requests.len());
        let mut pending = FuturesUnordered::new();

        for (index, request) in requests.into_iter().enumerate() {
            let Some(adapter) = self.adapters.get(&request.bidder_code) else {
                warn!(tid = %context.tid, bidder = %request.bidder_code, "unsupported bidder requested");
                let error = BidderError::UnsupportedBidder(request.bidder_code.clone());
                results[index] = Some(AdapterResult::new(&request.bidder_code, BidderOutcome::Error(error), 0, Vec::new()));
                completed.push(index);
                continue;
            };

            let invoker = AdapterInvoker::new(adapter, self.breakers.get(&request.bidder_code), Arc::clone(&self.client));
            let context = Arc::clone(&context);
            let budget = tmax.min(deadline.saturating_duration_since(Instant::now()));
            let handle = tokio::spawn(async move { invoker.invoke(&request, &context, budget).await });
            pending.push(handle.map(move |joined| (index, joined)));
        }

        loop {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some((index, joined))) => {
                    let result = joined.unwrap_or_else(|e| {
                        warn!(tid = %context.tid, bidder = %names[index], error = %e, "bidder task failed");
                        AdapterResult::new(
                            &names[index],
                            BidderOutcome::Error(BidderError::Transport(format!("bidder task failed: {}", e))),
                            elapsed_ms(started),
                            Vec::new(),
                        )
                    });
                    results[index] = Some(result);
                    completed.push(index);
                }
                Ok(None) => break,
                Err(_) => {
                    info!(tid = %context.tid, outstanding = pending.len(), "auction deadline reached");
                    break;
                }
            }
        }
        // 剩余任务被分离，继续在后台运行并完成熔断记账
        drop(pending);

        let mut bidder_results: Vec<AdapterResult> = completed
            .into_iter()
            .filter_map(|index| results[index].take())
            .collect();
        for (index, slot) in results.iter_mut().enumerate() {
            if slot.is_none() {
                bidder_results.push(AdapterResult::new(&names[index], BidderOutcome::Timeout, elapsed_ms(started), Vec::new()));
            }
        }

        let mut bids: Vec<Bid> = bidder_results
            .iter()
            .filter_map(|r| match &r.outcome {
                BidderOutcome::Bids(bids) => Some(bids.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        sort_bids(&mut bids, &code_order);

        if let Some((cache, settings)) = &self.cache {
            if settings.enabled && !bids.is_empty() {
                cache_winners(&context.tid, cache.as_ref(), settings, &mut bids).await;
            }
        }

        let result = AuctionResult { bids, bidder_results };
        info!(
            tid = %context.tid,
            bidders = result.bidder_results.len(),
            bids = result.bids.len(),
            response_time_ms = elapsed_ms(started),
            "auction finished"
        );
        self.write_auction_log(&context.tid, &result, elapsed_ms(started));
        Ok(result)
    }

    /// 不等待日志队列，队列满时丢弃这条竞价日志
    fn write_auction_log(&self, tid: &str, result: &AuctionResult, response_time_ms: u64) {
        let Some(runtime_logger) = &self.runtime_logger else {
            return;
        };
        let mut log = AuctionLog::new(tid);
        log.response_time_ms = response_time_ms;
        for bidder_result in &result.bidder_results {
            log.add_bidder_log(bidder_result);
        }
        for bid in &result.bids {
            log.set_winner(&bid.bidder, bid.price);
        }
        match serde_json::to_string(&log) {
            Ok(line) => {
                runtime_logger.try_log(log.level(), &line);
            }
            Err(e) => warn!(tid, error = %e, "failed to serialize auction log"),
        }
    }
}

/// 广告位 code 第一次出现的顺序
fn code_order(requests: &[AdapterRequest]) -> HashMap<String, usize> {
    let mut order = HashMap::new();
    for unit in requests.iter().flat_map(|r| r.ad_unit_bids.iter()) {
        let next = order.len();
        order.entry(unit.ad_unit_code.clone()).or_insert(next);
    }
    order
}

/// 稳定排序：先按广告位顺序分组，组内价格降序，同价保持完成顺序
pub fn sort_bids(bids: &mut [Bid], code_order: &HashMap<String, usize>) {
    let rank = |bid: &Bid| code_order.get(&bid.code).copied().unwrap_or(usize::MAX);
    bids.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| b.price.total_cmp(&a.price)));
}

/// 把每个广告位的最高价写入缓存；失败只记录日志，出价保持原样
async fn cache_winners(tid: &str, cache: &dyn CacheClient, settings: &CacheSettings, bids: &mut [Bid]) {
    let mut winners = Vec::new();
    for (index, bid) in bids.iter().enumerate() {
        if index == 0 || bids[index - 1].code != bid.code {
            winners.push(index);
        }
    }

    let puts: Vec<PutObject> = winners.iter().map(|&i| PutObject::from_bid(&bids[i])).collect();
    let budget = settings.timeout();
    let stored = match timeout(budget, cache.store(puts, budget)).await {
        Ok(Ok(ids)) if ids.len() == winners.len() => ids,
        Ok(Ok(ids)) => {
            warn!(tid, expected = winners.len(), returned = ids.len(), "cache returned unexpected number of ids");
            return;
        }
        Ok(Err(e)) => {
            warn!(tid, kind = %ErrorKind::CacheUnavailable, error = %e, "failed to cache winning bids");
            return;
        }
        Err(_) => {
            warn!(tid, kind = %ErrorKind::CacheUnavailable, timeout_ms = budget.as_millis() as u64, "cache call timed out");
            return;
        }
    };

    for (index, uuid) in winners.into_iter().zip(stored) {
        let bid = &mut bids[index];
        bid.cache_url = settings.cache_url(&uuid);
        bid.cache_id = Some(uuid);
        if settings.mode == CacheMode::Replace {
            bid.adm = None;
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidding::bidder_client::ReqwestHttpClient;
    use crate::config::config_manager::BreakerSettings;
    use crate::logging::LogLevel;
    use proptest::prelude::*;

    fn bid(code: &str, bidder: &str, price: f64) -> Bid {
        Bid {
            code: code.into(),
            bidder: bidder.into(),
            price,
            ..Default::default()
        }
    }

    #[test]
    fn groups_by_code_then_price_with_stable_ties() {
        let order = HashMap::from([("top".to_string(), 0), ("side".to_string(), 1)]);
        let mut bids = vec![
            bid("side", "a", 1.0),
            bid("top", "b", 0.5),
            bid("top", "c", 2.0),
            bid("side", "d", 3.0),
            bid("top", "e", 2.0),
        ];
        sort_bids(&mut bids, &order);
        let got: Vec<(&str, &str)> = bids.iter().map(|b| (b.code.as_str(), b.bidder.as_str())).collect();
        assert_eq!(got, vec![("top", "c"), ("top", "e"), ("top", "b"), ("side", "d"), ("side", "a")]);
    }

    #[tokio::test]
    async fn full_runtime_log_queue_does_not_hold_the_response() {
        let (logger, _queue) = RuntimeLogger::stalled(1);
        assert!(logger.try_log(LogLevel::Info, "fills the only slot"));

        let coordinator = ExchangeCoordinator::new(
            AdapterRegistry::new(),
            Arc::new(CircuitBreakers::new(BreakerSettings::default())),
            Arc::new(ReqwestHttpClient::default()),
        )
        .with_runtime_logger(logger);
        let context = PreBidRequestContext {
            tid: "tid".into(),
            timeout_millis: 50,
            ..Default::default()
        };

        let finished = timeout(
            Duration::from_millis(500),
            coordinator.run_auction(vec![AdapterRequest::new("ghost", vec![])], context),
        )
        .await
        .expect("auction waited on the runtime log queue");
        assert_eq!(finished.unwrap().bidder_results.len(), 1);
    }

    proptest! {
        #[test]
        fn sorted_bids_are_grouped_and_descending(prices in proptest::collection::vec((0usize..3, 0u32..1000), 0..40)) {
            let order: HashMap<String, usize> = (0..3).map(|i| (format!("code{}", i), i)).collect();
            let mut bids: Vec<Bid> = prices
                .iter()
                .map(|(code, price)| bid(&format!("code{}", code), "x", *price as f64 / 100.0))
                .collect();
            sort_bids(&mut bids, &order);
            for pair in bids.windows(2) {
                let (ra, rb) = (order[&pair[0].code], order[&pair[1].code]);
                prop_assert!(ra <= rb);
                if ra == rb {
                    prop_assert!(pair[0].price >= pair[1].price);
                }
            }
        }
    }
}
