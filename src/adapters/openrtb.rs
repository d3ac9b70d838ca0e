// src/adapters/openrtb.rs

//! 基于 OpenRTB 的 adapter 共用逻辑：广告位校验、imp 构造、公共字段填充以及出价提取。

use std::collections::BTreeMap;

use crate::error::BidderError;
use crate::model::{AdUnitBid, AdapterRequest, Bid, ExchangeCall, MediaType, PreBidRequestContext};
use crate::openrtb::request::{Banner, Device, Imp, Regs, Source, User, Video};

pub const NO_IMPRESSIONS: &str = "openRTB bids need at least one Imp";
pub const NO_VIDEO_DATA: &str = "Invalid AdUnit: VIDEO media type with no video data";

/// 校验广告位的媒体类型；任意一个广告位不合法都会让整个请求失败
pub fn validate_ad_units(request: &AdapterRequest) -> Result<(), BidderError> {
    if request.ad_unit_bids.is_empty() {
        return Err(BidderError::InvalidParameters(format!(
            "No ad units for bidder '{}'",
            request.bidder_code
        )));
    }
    for unit in &request.ad_unit_bids {
        if unit.media_types.is_empty() {
            return Err(BidderError::NoImpressions(NO_IMPRESSIONS.to_string()));
        }
        if unit.media_types.contains(&MediaType::Video) {
            let has_mimes = unit.video.as_ref().is_some_and(|v| !v.mimes.is_empty());
            if !has_mimes {
                return Err(BidderError::InvalidVideoParams(NO_VIDEO_DATA.to_string()));
            }
        }
    }
    Ok(())
}

/// 广告位的 banner 对象：宽高取第一个尺寸，format 为全部尺寸
pub fn banner(unit: &AdUnitBid) -> Banner {
    let first = unit.sizes.first();
    Banner {
        w: first.map(|f| f.w),
        h: first.map(|f| f.h),
        format: if unit.sizes.is_empty() { None } else { Some(unit.sizes.clone()) },
        topframe: unit.topframe,
    }
}

pub fn video(unit: &AdUnitBid) -> Option<Video> {
    let params = unit.video.as_ref()?;
    let first = unit.sizes.first();
    Some(Video {
        mimes: params.mimes.clone(),
        minduration: params.min_duration,
        maxduration: params.max_duration,
        protocols: params.protocols.clone(),
        startdelay: params.startdelay,
        playbackmethod: params.playback_method.map(|m| vec![m]),
        w: first.map(|f| f.w),
        h: first.map(|f| f.h),
    })
}

/// 每种媒体类型生成一个 imp，id 统一为广告位 code
pub fn imps(unit: &AdUnitBid, banner_for: impl Fn(&AdUnitBid) -> Banner, tagid: Option<&str>) -> Vec<Imp> {
    unit.media_types
        .iter()
        .filter_map(|media_type| {
            let (banner, video) = match media_type {
                MediaType::Banner => (Some(banner_for(unit)), None),
                MediaType::Video => (None, Some(video(unit)?)),
            };
            Some(Imp {
                id: unit.ad_unit_code.clone(),
                banner,
                video,
                tagid: tagid.map(str::to_string),
                instl: unit.instl,
                bidfloor: unit.bid_floor,
                ext: None,
            })
        })
        .collect()
}

pub fn json_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Content-Type".to_string(), "application/json;charset=utf-8".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ])
}

pub fn device(context: &PreBidRequestContext) -> Option<Device> {
    let mut device = context.device.clone().unwrap_or_default();
    if context.ua.is_some() {
        device.ua = context.ua.clone();
    }
    if context.ip.is_some() {
        device.ip = context.ip.clone();
    }
    if !context.consent.allows_user_ids() {
        device.ifa = None;
    }
    if device == Device::default() {
        None
    } else {
        Some(device)
    }
}

/// 用户信息；GDPR 适用且没有 consent 时剥离全部用户标识
pub fn user(context: &PreBidRequestContext) -> Option<User> {
    let mut user = context.user.clone().unwrap_or_default();
    if !context.consent.allows_user_ids() {
        user.id = None;
        user.buyeruid = None;
    }
    user.ext = context.consent.user_ext();
    if user == User::default() {
        None
    } else {
        Some(user)
    }
}

pub fn source(context: &PreBidRequestContext) -> Source {
    Source {
        fd: Some(1),
        tid: Some(context.tid.clone()),
    }
}

pub fn regs(context: &PreBidRequestContext) -> Option<Regs> {
    let ext = context.consent.regs_ext();
    let coppa = context.regs.as_ref().and_then(|r| r.coppa);
    if ext.is_none() && coppa.is_none() {
        None
    } else {
        Some(Regs { coppa, ext })
    }
}

/// 从 bidder 响应提取出价；impid 不在请求广告位中时整体失败
pub fn extract_bids(request: &AdapterRequest, call: &ExchangeCall) -> Result<Vec<Bid>, BidderError> {
    let Some(response) = call.response.as_ref() else {
        return Ok(Vec::new());
    };

    response
        .bids()
        .map(|bid| {
            let unit = request.find_ad_unit(&bid.impid).ok_or_else(|| {
                BidderError::UnknownAdUnitCode(format!("Unknown ad unit code '{}'", bid.impid))
            })?;
            Ok(Bid {
                code: unit.ad_unit_code.clone(),
                bid_id: unit.bid_id.clone(),
                price: bid.price,
                adm: bid.adm.clone(),
                creative_id: bid.crid.clone(),
                width: bid.w,
                height: bid.h,
                bidder: unit.bidder_code.clone(),
                deal_id: bid.dealid.clone(),
                media_type: media_type_of(call, &bid.impid),
                cache_id: None,
                cache_url: None,
                response_time_ms: Some(call.debug.response_time_ms),
            })
        })
        .collect()
}

/// 依据发出的 imp 判断媒体类型；只有 video 没有 banner 时才算 video
fn media_type_of(call: &ExchangeCall, impid: &str) -> MediaType {
    let Some(request) = call.request.as_ref() else {
        return MediaType::Banner;
    };
    let mut imps = request.imp.iter().filter(|imp| imp.id == impid);
    let has_banner = imps.clone().any(|imp| imp.banner.is_some());
    let has_video = imps.any(|imp| imp.video.is_some());
    if has_video && !has_banner {
        MediaType::Video
    } else {
        MediaType::Banner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BidderDebug, VideoParams};
    use crate::openrtb::request::{BidRequest, Format};
    use crate::openrtb::response::{Bid as RtbBid, BidResponse, SeatBid};
    use crate::privacy::{ConsentDescriptor, RegulationFlag};
    use std::collections::BTreeSet;

    fn unit(code: &str, media_types: &[MediaType]) -> AdUnitBid {
        AdUnitBid {
            bidder_code: "pubmatic".into(),
            bid_id: format!("bid-{}", code),
            ad_unit_code: code.into(),
            sizes: vec![Format { w: 300, h: 250 }, Format { w: 728, h: 90 }],
            media_types: media_types.iter().copied().collect::<BTreeSet<_>>(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_media_types_fail_with_no_impressions() {
        let request = AdapterRequest::new("pubmatic", vec![unit("a", &[MediaType::Banner]), unit("b", &[])]);
        assert_eq!(
            validate_ad_units(&request),
            Err(BidderError::NoImpressions(NO_IMPRESSIONS.into()))
        );
    }

    #[test]
    fn video_without_mimes_fails() {
        let mut video_unit = unit("a", &[MediaType::Video]);
        video_unit.video = Some(VideoParams::default());
        let request = AdapterRequest::new("pubmatic", vec![video_unit]);
        assert_eq!(
            validate_ad_units(&request),
            Err(BidderError::InvalidVideoParams(NO_VIDEO_DATA.into()))
        );
    }

    #[test]
    fn imps_cover_each_media_type() {
        let mut both = unit("a", &[MediaType::Banner, MediaType::Video]);
        both.video = Some(VideoParams { mimes: vec!["video/mp4".into()], playback_method: Some(1), ..Default::default() });
        let imps = imps(&both, banner, Some("slot"));
        assert_eq!(imps.len(), 2);
        assert_eq!(imps[0].banner.as_ref().and_then(|b| b.w), Some(300));
        assert_eq!(imps[1].video.as_ref().map(|v| v.mimes.clone()), Some(vec!["video/mp4".to_string()]));
        assert_eq!(imps[1].video.as_ref().and_then(|v| v.playbackmethod.clone()), Some(vec![1]));
        assert!(imps.iter().all(|imp| imp.id == "a" && imp.tagid.as_deref() == Some("slot")));
    }

    #[test]
    fn user_ids_are_stripped_without_consent() {
        let context = PreBidRequestContext {
            user: Some(User { id: Some("u".into()), buyeruid: Some("b".into()), ext: None }),
            consent: ConsentDescriptor { regulation_applies: RegulationFlag::Yes, consent_string: None },
            ..Default::default()
        };
        assert_eq!(user(&context), None);
        assert_eq!(regs(&context).and_then(|r| r.ext), Some(serde_json::json!({ "gdpr": 1 })));
    }

    fn call(impids: &[&str]) -> ExchangeCall {
        let bids = impids
            .iter()
            .map(|id| RtbBid { impid: id.to_string(), price: 1.5, crid: Some("crid".into()), ..Default::default() })
            .collect();
        ExchangeCall::success(
            BidRequest::default(),
            BidResponse { id: "r".into(), seatbid: Some(vec![SeatBid { bid: bids, ..Default::default() }]), ..Default::default() },
            BidderDebug { response_time_ms: 42, ..Default::default() },
        )
    }

    #[test]
    fn extract_bids_maps_fields_and_is_repeatable() {
        let request = AdapterRequest::new("pubmatic", vec![unit("a", &[MediaType::Banner])]);
        let exchange = call(&["a"]);
        let first = extract_bids(&request, &exchange).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].code, "a");
        assert_eq!(first[0].bid_id, "bid-a");
        assert_eq!(first[0].bidder, "pubmatic");
        assert_eq!(first[0].creative_id.as_deref(), Some("crid"));
        assert_eq!(first[0].response_time_ms, Some(42));
        assert_eq!(extract_bids(&request, &exchange).unwrap(), first);
    }

    #[test]
    fn extract_bids_fails_loud_on_unknown_code() {
        let request = AdapterRequest::new("pubmatic", vec![unit("a", &[MediaType::Banner])]);
        assert_eq!(
            extract_bids(&request, &call(&["a", "other"])),
            Err(BidderError::UnknownAdUnitCode("Unknown ad unit code 'other'".into()))
        );
        assert_eq!(extract_bids(&request, &ExchangeCall::empty(BidderDebug::default())), Ok(vec![]));
    }
}
