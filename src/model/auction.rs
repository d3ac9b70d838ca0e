// src/model/auction.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::openrtb::request::Format;

/// 广告位接受的媒体类型
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Banner,
    Video,
}

/// 广告位上的视频参数（Prebid 请求格式）
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VideoParams {
    #[serde(default)]
    pub mimes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdelay: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_method: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<i32>>,
}

/// **单个待填充广告位在某个 bidder 视角下的描述**
///
/// `params` 的结构由具体 adapter 定义，这里只当作不透明 JSON 保存。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AdUnitBid {
    pub bidder_code: String,
    pub bid_id: String,
    /// 广告位 code，同一场竞价内唯一
    pub ad_unit_code: String,
    pub sizes: Vec<Format>,
    pub media_types: BTreeSet<MediaType>,
    pub params: Option<Value>,
    pub bid_floor: Option<f64>,
    pub video: Option<VideoParams>,
    pub instl: Option<i32>,
    pub topframe: Option<i32>,
}

/// 一场竞价中发给某个 bidder 的全部广告位
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AdapterRequest {
    pub bidder_code: String,
    pub ad_unit_bids: Vec<AdUnitBid>,
}

impl AdapterRequest {
    pub fn new(bidder_code: &str, ad_unit_bids: Vec<AdUnitBid>) -> Self {
        Self {
            bidder_code: bidder_code.to_string(),
            ad_unit_bids,
        }
    }

    pub fn find_ad_unit(&self, code: &str) -> Option<&AdUnitBid> {
        self.ad_unit_bids.iter().find(|unit| unit.ad_unit_code == code)
    }
}
