// src/logging/auction_log.rs

use serde::{Deserialize, Serialize};

use crate::bidding::invoker::{AdapterResult, BidderOutcome};
use crate::logging::local_timestamp;
use crate::logging::runtime_logger::LogLevel;

/// **竞价日志**，每场竞价一条
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuctionLog {
    pub timestamp: String,
    pub log_type: String,
    pub tid: String,
    /// 参与竞价的 bidder 数量
    pub bidder_attempts: usize,
    /// "success" 或 "no_bids"
    pub status: String,
    pub winning_bidder: Option<String>,
    pub winning_price: f64,
    pub response_time_ms: u64,
    pub bidder_log: Vec<BidderLog>,
}

/// **单个 bidder 的竞价日志**
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BidderLog {
    pub bidder: String,
    pub outcome: String,
    pub num_bids: usize,
    pub top_price: f64,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuctionLog {
    pub fn new(tid: &str) -> Self {
        Self {
            timestamp: local_timestamp(),
            log_type: "prebid_auction".to_string(),
            tid: tid.to_string(),
            bidder_attempts: 0,
            status: "no_bids".to_string(),
            winning_bidder: None,
            winning_price: 0.0,
            response_time_ms: 0,
            bidder_log: Vec::new(),
        }
    }

    pub fn add_bidder_log(&mut self, result: &AdapterResult) {
        let (top_price, error) = match &result.outcome {
            BidderOutcome::Bids(bids) => (bids.iter().map(|b| b.price).fold(0.0, f64::max), None),
            BidderOutcome::Error(e) => (0.0, Some(e.to_string())),
            BidderOutcome::NoBid | BidderOutcome::Timeout | BidderOutcome::CircuitOpen => (0.0, None),
        };
        self.bidder_log.push(BidderLog {
            bidder: result.bidder.clone(),
            outcome: result.outcome.label().to_string(),
            num_bids: result.outcome.num_bids(),
            top_price,
            response_time_ms: result.response_time_ms,
            error,
        });
        self.bidder_attempts += 1;
    }

    /// 只保留最高价
    pub fn set_winner(&mut self, bidder: &str, price: f64) {
        if self.winning_bidder.is_none() || price > self.winning_price {
            self.status = "success".to_string();
            self.winning_bidder = Some(bidder.to_string());
            self.winning_price = price;
        }
    }

    pub fn level(&self) -> LogLevel {
        if self.winning_bidder.is_some() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BidderError;
    use crate::model::Bid;

    #[test]
    fn tracks_highest_winner_and_bidder_outcomes() {
        let mut log = AuctionLog::new("tid");
        assert_eq!(log.level(), LogLevel::Warn);

        let bids = vec![
            Bid { bidder: "pubmatic".into(), price: 1.0, ..Default::default() },
            Bid { bidder: "pubmatic".into(), price: 2.5, ..Default::default() },
        ];
        log.add_bidder_log(&AdapterResult::new("pubmatic", BidderOutcome::Bids(bids), 40, vec![]));
        log.add_bidder_log(&AdapterResult::new(
            "indexexchange",
            BidderOutcome::Error(BidderError::Transport("refused".into())),
            12,
            vec![],
        ));
        log.set_winner("indexexchange", 1.5);
        log.set_winner("pubmatic", 2.5);
        log.set_winner("other", 2.0);

        assert_eq!(log.bidder_attempts, 2);
        assert_eq!(log.bidder_log[0].top_price, 2.5);
        assert_eq!(log.bidder_log[1].error.as_deref(), Some("transport error: refused"));
        assert_eq!(log.winning_bidder.as_deref(), Some("pubmatic"));
        assert_eq!(log.status, "success");
        assert_eq!(log.level(), LogLevel::Info);
    }
}
