// src/openrtb/response.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenRTB Bid Response，bidder 返回的原始响应
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BidResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seatbid: Option<Vec<SeatBid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cur: Option<String>,
    /// no-bid reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbr: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SeatBid {
    #[serde(default)]
    pub bid: Vec<Bid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Bid {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub impid: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adomain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dealid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

impl BidResponse {
    /// 展平所有 seatbid 下的 bid；seatbid 为空或缺失时返回空迭代器
    pub fn bids(&self) -> impl Iterator<Item = &Bid> {
        self.seatbid
            .iter()
            .flatten()
            .flat_map(|seatbid| seatbid.bid.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_seatbid_decodes_to_no_bids() {
        let response: BidResponse = serde_json::from_str(r#"{"id":"r1","seatbid":null}"#).unwrap();
        assert_eq!(response.bids().count(), 0);
    }

    #[test]
    fn bids_flattens_all_seats() {
        let response: BidResponse = serde_json::from_str(
            r#"{"id":"r1","seatbid":[{"bid":[{"impid":"a","price":1.0}]},{"bid":[{"impid":"b","price":2.0}]}]}"#,
        )
        .unwrap();
        let impids: Vec<&str> = response.bids().map(|b| b.impid.as_str()).collect();
        assert_eq!(impids, vec!["a", "b"]);
    }
}
