// src/adapters/pubmatic.rs

use serde::Deserialize;
use tracing::warn;

use crate::adapters::openrtb;
use crate::adapters::Adapter;
use crate::error::{BidderError, ConfigError};
use crate::model::{AdUnitBid, AdapterRequest, Bid, ExchangeCall, HttpRequest, PreBidRequestContext};
use crate::openrtb::request::{Banner, BidRequest, Publisher, Site};

pub const BIDDER: &str = "pubmatic";

const INVALID_PARAMS: &str = "Incorrect adSlot / Publisher param";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct PubmaticParams {
    publisher_id: Option<String>,
    ad_slot: Option<String>,
}

/// 解析后的 adSlot：`slot42@300x250[:suffix]`
#[derive(Debug, Clone, PartialEq, Eq)]
struct AdSlot {
    tag_id: String,
    width: u32,
    height: u32,
}

/// 单个广告位解析成功后的结果
struct ValidUnit<'a> {
    unit: &'a AdUnitBid,
    publisher_id: String,
    slot: AdSlot,
}

pub struct PubmaticAdapter {
    endpoint: String,
}

impl PubmaticAdapter {
    pub fn new(endpoint: &str) -> Result<Self, ConfigError> {
        reqwest::Url::parse(endpoint)
            .map_err(|_| ConfigError::Invalid(format!("URL supplied is not valid: {}", endpoint)))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
        })
    }

    fn parse_unit(unit: &AdUnitBid) -> Option<ValidUnit<'_>> {
        let params: PubmaticParams = serde_json::from_value(unit.params.clone()?).ok()?;
        let publisher_id = params.publisher_id.filter(|p| !p.trim().is_empty())?;
        let slot = parse_ad_slot(params.ad_slot.as_deref()?)?;
        Some(ValidUnit {
            unit,
            publisher_id: publisher_id.trim().to_string(),
            slot,
        })
    }
}

fn parse_ad_slot(raw: &str) -> Option<AdSlot> {
    let (tag_id, rest) = raw.trim().split_once('@')?;
    // 尺寸后面允许带 `:xxx` 后缀
    let size = rest.split(':').next()?;
    let (w, h) = size.split_once(['x', 'X'])?;
    if tag_id.is_empty() {
        return None;
    }
    Some(AdSlot {
        tag_id: tag_id.to_string(),
        width: w.trim().parse().ok()?,
        height: h.trim().parse().ok()?,
    })
}

impl Adapter for PubmaticAdapter {
    fn name(&self) -> &str {
        BIDDER
    }

    fn build_requests(
        &self,
        request: &AdapterRequest,
        context: &PreBidRequestContext,
    ) -> Result<Vec<HttpRequest>, BidderError> {
        openrtb::validate_ad_units(request)?;

        let valid: Vec<ValidUnit<'_>> = request
            .ad_unit_bids
            .iter()
            .filter_map(|unit| {
                let parsed = Self::parse_unit(unit);
                if parsed.is_none() {
                    warn!(bidder = BIDDER, ad_unit = %unit.ad_unit_code, "skipping ad unit with invalid params");
                }
                parsed
            })
            .collect();

        let Some(first) = valid.first() else {
            return Err(BidderError::InvalidParameters(INVALID_PARAMS.to_string()));
        };
        let publisher_id = first.publisher_id.clone();

        let imps = valid
            .iter()
            .flat_map(|v| {
                let slot = v.slot.clone();
                openrtb::imps(
                    v.unit,
                    move |unit| Banner {
                        w: Some(slot.width),
                        h: Some(slot.height),
                        format: None,
                        topframe: unit.topframe,
                    },
                    Some(v.slot.tag_id.as_str()),
                )
            })
            .collect();

        let (site, app) = match context.app.clone() {
            Some(mut app) => {
                if app.publisher.is_none() {
                    app.publisher = Some(Publisher {
                        id: Some(publisher_id),
                        domain: None,
                    });
                }
                (None, Some(app))
            }
            None => (
                Some(Site {
                    id: None,
                    domain: context.domain.clone(),
                    page: context.referer.clone(),
                    publisher: Some(Publisher {
                        id: Some(publisher_id),
                        domain: context.domain.clone(),
                    }),
                }),
                None,
            ),
        };

        let body = BidRequest {
            id: context.tid.clone(),
            imp: imps,
            site,
            app,
            device: openrtb::device(context),
            user: openrtb::user(context),
            source: Some(openrtb::source(context)),
            regs: openrtb::regs(context),
            at: Some(1),
            tmax: Some(context.timeout_millis),
            ..Default::default()
        };

        let mut headers = openrtb::json_headers();
        headers.insert(
            "Set-Cookie".to_string(),
            format!("KADUSERCOOKIE={}", context.buyer_uid().unwrap_or_default()),
        );

        Ok(vec![HttpRequest {
            uri: self.endpoint.clone(),
            headers,
            body,
        }])
    }

    fn extract_bids(&self, request: &AdapterRequest, call: &ExchangeCall) -> Result<Vec<Bid>, BidderError> {
        openrtb::extract_bids(request, call)
    }
}
