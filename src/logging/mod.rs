// src/logging/mod.rs

pub mod auction_log;
pub mod runtime_logger;

pub use auction_log::{AuctionLog, BidderLog};
pub use runtime_logger::{LogLevel, RuntimeLogger};

use chrono::{FixedOffset, Utc};

/// 东八区 RFC3339 时间戳
pub fn local_timestamp() -> String {
    let now = Utc::now();
    match FixedOffset::east_opt(8 * 3600) {
        Some(tz) => now.with_timezone(&tz).to_rfc3339(),
        None => now.to_rfc3339(),
    }
}
