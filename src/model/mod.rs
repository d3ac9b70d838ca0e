// src/model/mod.rs

pub mod auction;
pub mod bid;
pub mod context;
pub mod prebid;

pub use auction::{AdUnitBid, AdapterRequest, MediaType, VideoParams};
pub use bid::{Bid, BidderDebug, BidderErrorInfo, BidderStatus, ExchangeCall, HttpRequest};
pub use context::PreBidRequestContext;
