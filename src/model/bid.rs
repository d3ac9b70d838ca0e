// src/model/bid.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ErrorKind;
use crate::model::auction::MediaType;
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::BidResponse;

/// 归一化后的出价
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Bid {
    /// 对应 AdUnitBid.ad_unit_code
    pub code: String,
    pub bid_id: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub bidder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

/// adapter 产出的出站 HTTP 请求，每次调用新建，调用结束即丢弃
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: BidRequest,
}

/// 单次 bidder 调用的调试信息
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BidderDebug {
    pub request_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
}

/// 一次出站调用的结果：发送的请求、bidder 响应（失败或 204 时为空）以及调试信息
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeCall {
    pub request: Option<BidRequest>,
    pub response: Option<BidResponse>,
    pub debug: BidderDebug,
}

impl ExchangeCall {
    pub fn success(request: BidRequest, response: BidResponse, debug: BidderDebug) -> Self {
        Self {
            request: Some(request),
            response: Some(response),
            debug,
        }
    }

    pub fn empty(debug: BidderDebug) -> Self {
        Self {
            request: None,
            response: None,
            debug,
        }
    }
}

/// bidder_status 中的错误描述
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BidderErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// 单个 bidder 在一场竞价中的状态，写入响应的调试部分
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BidderStatus {
    pub bidder: String,
    /// bids / no_bid / error / timeout / circuit_open
    pub outcome: String,
    pub num_bids: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BidderErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug: Vec<BidderDebug>,
}
