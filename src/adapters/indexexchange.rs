// src/adapters/indexexchange.rs

use serde::Deserialize;
use tracing::warn;

use crate::adapters::openrtb;
use crate::adapters::Adapter;
use crate::error::{BidderError, ConfigError};
use crate::model::{AdUnitBid, AdapterRequest, Bid, ExchangeCall, HttpRequest, PreBidRequestContext};
use crate::openrtb::request::{BidRequest, Publisher, Site};

pub const BIDDER: &str = "indexexchange";

#[derive(Deserialize, Debug, Clone)]
struct IndexExchangeParams {
    #[serde(rename = "siteID")]
    site_id: Option<i64>,
}

/// Index Exchange：每个广告位单独发一个请求，不支持 app 流量
pub struct IndexExchangeAdapter {
    endpoint: String,
}

impl IndexExchangeAdapter {
    pub fn new(endpoint: &str) -> Result<Self, ConfigError> {
        reqwest::Url::parse(endpoint)
            .map_err(|_| ConfigError::Invalid(format!("URL supplied is not valid: {}", endpoint)))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
        })
    }

    fn site_id(unit: &AdUnitBid) -> Option<i64> {
        let params: IndexExchangeParams = serde_json::from_value(unit.params.clone()?).ok()?;
        params.site_id.filter(|id| *id > 0)
    }
}

impl Adapter for IndexExchangeAdapter {
    fn name(&self) -> &str {
        BIDDER
    }

    fn build_requests(
        &self,
        request: &AdapterRequest,
        context: &PreBidRequestContext,
    ) -> Result<Vec<HttpRequest>, BidderError> {
        if context.app.is_some() {
            return Err(BidderError::InvalidParameters("Index doesn't support apps".to_string()));
        }
        openrtb::validate_ad_units(request)?;

        let requests: Vec<HttpRequest> = request
            .ad_unit_bids
            .iter()
            .filter_map(|unit| {
                let Some(site_id) = Self::site_id(unit) else {
                    warn!(bidder = BIDDER, ad_unit = %unit.ad_unit_code, "skipping ad unit without siteID");
                    return None;
                };
                let body = BidRequest {
                    id: context.tid.clone(),
                    imp: openrtb::imps(unit, openrtb::banner, None),
                    site: Some(Site {
                        id: None,
                        domain: context.domain.clone(),
                        page: context.referer.clone(),
                        publisher: Some(Publisher {
                            id: Some(site_id.to_string()),
                            domain: None,
                        }),
                    }),
                    device: openrtb::device(context),
                    user: openrtb::user(context),
                    source: Some(openrtb::source(context)),
                    regs: openrtb::regs(context),
                    at: Some(1),
                    tmax: Some(context.timeout_millis),
                    ..Default::default()
                };
                Some(HttpRequest {
                    uri: self.endpoint.clone(),
                    headers: openrtb::json_headers(),
                    body,
                })
            })
            .collect();

        if requests.is_empty() {
            return Err(BidderError::InvalidParameters("Missing siteID param".to_string()));
        }
        Ok(requests)
    }

    fn extract_bids(&self, request: &AdapterRequest, call: &ExchangeCall) -> Result<Vec<Bid>, BidderError> {
        openrtb::extract_bids(request, call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;
    use crate::openrtb::request::{App, Format};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn unit(code: &str, params: serde_json::Value) -> AdUnitBid {
        AdUnitBid {
            bidder_code: BIDDER.into(),
            bid_id: format!("bid-{}", code),
            ad_unit_code: code.into(),
            sizes: vec![Format { w: 300, h: 250 }, Format { w: 300, h: 600 }],
            media_types: BTreeSet::from([MediaType::Banner]),
            params: Some(params),
            ..Default::default()
        }
    }

    fn context() -> PreBidRequestContext {
        PreBidRequestContext {
            tid: "tid".into(),
            timeout_millis: 800,
            referer: Some("http://www.example.com/page".into()),
            domain: Some("www.example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn one_request_per_valid_ad_unit() {
        let adapter = IndexExchangeAdapter::new("http://ix.example.com/bid").unwrap();
        let request = AdapterRequest::new(
            BIDDER,
            vec![
                unit("a", json!({ "siteID": 100 })),
                unit("b", json!({ "siteID": "not-a-number" })),
                unit("c", json!({ "siteID": 200 })),
            ],
        );
        let http = adapter.build_requests(&request, &context()).unwrap();
        assert_eq!(http.len(), 2);
        assert_eq!(http[0].body.imp[0].id, "a");
        assert_eq!(
            http[1].body.site.as_ref().and_then(|s| s.publisher.as_ref()).and_then(|p| p.id.as_deref()),
            Some("200")
        );
        let banner = http[0].body.imp[0].banner.as_ref().unwrap();
        assert_eq!((banner.w, banner.h), (Some(300), Some(250)));
        assert_eq!(banner.format.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn rejects_app_traffic_and_missing_site_id() {
        let adapter = IndexExchangeAdapter::new("http://ix.example.com/bid").unwrap();
        let request = AdapterRequest::new(BIDDER, vec![unit("a", json!({ "siteID": 0 }))]);
        assert_eq!(
            adapter.build_requests(&request, &context()),
            Err(BidderError::InvalidParameters("Missing siteID param".into()))
        );

        let app_ctx = PreBidRequestContext { app: Some(App::default()), ..context() };
        assert_eq!(
            adapter.build_requests(&request, &app_ctx),
            Err(BidderError::InvalidParameters("Index doesn't support apps".into()))
        );
    }
}
