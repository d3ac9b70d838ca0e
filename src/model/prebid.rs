// src/model/prebid.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use uuid::Uuid;

use crate::config::config_manager::AuctionSettings;
use crate::error::AuctionError;
use crate::model::auction::{AdUnitBid, AdapterRequest, MediaType, VideoParams};
use crate::model::bid::{Bid, BidderStatus};
use crate::model::context::PreBidRequestContext;
use crate::openrtb::request::{App, Device, Format, Regs, User};
use crate::privacy::ConsentDescriptor;

/// `/auction` 接口的请求体
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PreBidRequest {
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub timeout_millis: Option<u64>,
    #[serde(default)]
    pub is_debug: bool,
    /// 页面地址，缺省时使用 Referer 头
    #[serde(default)]
    pub url: Option<String>,
    pub ad_units: Vec<AdUnit>,
    #[serde(default)]
    pub app: Option<App>,
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub regs: Option<Regs>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AdUnit {
    pub code: String,
    #[serde(default)]
    pub sizes: Vec<Format>,
    /// 缺省为 banner；显式给出空数组表示没有可用的媒体类型
    #[serde(default)]
    pub media_types: Option<BTreeSet<MediaType>>,
    #[serde(default)]
    pub video: Option<VideoParams>,
    #[serde(default)]
    pub instl: Option<i32>,
    #[serde(default)]
    pub topframe: Option<i32>,
    #[serde(default)]
    pub bid_floor: Option<f64>,
    pub bids: Vec<BidderParams>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BidderParams {
    pub bidder: String,
    #[serde(default)]
    pub bid_id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// HTTP 层采集到的调用方信息
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub ua: Option<String>,
    pub referer: Option<String>,
}

impl PreBidRequest {
    /// 按 bidder 拆分广告位，bidder 顺序与其在请求中首次出现的顺序一致
    pub fn adapter_requests(&self) -> Result<Vec<AdapterRequest>, AuctionError> {
        if self.ad_units.is_empty() {
            return Err(AuctionError::InvalidRequest("ad_units must not be empty".to_string()));
        }

        let mut seen_codes = HashSet::new();
        let mut requests: Vec<AdapterRequest> = Vec::new();

        for unit in &self.ad_units {
            if unit.code.is_empty() {
                return Err(AuctionError::InvalidRequest("ad unit code must not be empty".to_string()));
            }
            if !seen_codes.insert(unit.code.as_str()) {
                return Err(AuctionError::InvalidRequest(format!(
                    "duplicate ad unit code '{}'",
                    unit.code
                )));
            }

            let media_types = unit
                .media_types
                .clone()
                .unwrap_or_else(|| BTreeSet::from([MediaType::Banner]));

            let mut seen_bidders = HashSet::new();
            for bidder in &unit.bids {
                if !seen_bidders.insert(bidder.bidder.as_str()) {
                    return Err(AuctionError::InvalidRequest(format!(
                        "bidder '{}' listed twice in ad unit '{}'",
                        bidder.bidder, unit.code
                    )));
                }
                let ad_unit_bid = AdUnitBid {
                    bidder_code: bidder.bidder.clone(),
                    bid_id: bidder
                        .bid_id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    ad_unit_code: unit.code.clone(),
                    sizes: unit.sizes.clone(),
                    media_types: media_types.clone(),
                    params: bidder.params.clone(),
                    bid_floor: unit.bid_floor,
                    video: unit.video.clone(),
                    instl: unit.instl,
                    topframe: unit.topframe,
                };

                match requests.iter_mut().find(|r| r.bidder_code == bidder.bidder) {
                    Some(request) => request.ad_unit_bids.push(ad_unit_bid),
                    None => requests.push(AdapterRequest::new(&bidder.bidder, vec![ad_unit_bid])),
                }
            }
        }

        Ok(requests)
    }

    /// 生成竞价上下文，超时被限制在配置允许的范围内
    pub fn context(&self, client: ClientInfo, settings: &AuctionSettings) -> PreBidRequestContext {
        let timeout_millis = self
            .timeout_millis
            .filter(|t| *t > 0)
            .unwrap_or(settings.default_timeout_ms)
            .min(settings.max_timeout_ms);

        let referer = self.url.clone().or(client.referer);
        let domain = referer
            .as_deref()
            .and_then(|r| reqwest::Url::parse(r).ok())
            .and_then(|url| url.host_str().map(str::to_string));

        let ip = client
            .ip
            .or_else(|| self.device.as_ref().and_then(|d| d.ip.clone()));
        let ua = client
            .ua
            .or_else(|| self.device.as_ref().and_then(|d| d.ua.clone()));

        PreBidRequestContext {
            tid: self
                .tid
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            timeout_millis,
            ip,
            ua,
            referer,
            domain,
            device: self.device.clone(),
            app: self.app.clone(),
            user: self.user.clone(),
            regs: self.regs.clone(),
            consent: ConsentDescriptor::from_request(self.regs.as_ref(), self.user.as_ref()),
            is_debug: self.is_debug,
            start_time: Instant::now(),
        }
    }
}

/// `/auction` 接口的响应体
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PreBidResponse {
    pub tid: String,
    pub status: String,
    pub bidder_status: Vec<BidderStatus>,
    pub bids: Vec<Bid>,
    pub response_time_ms: u64,
}
