// src/model/context.rs

use std::time::Instant;

use crate::openrtb::request::{App, Device, Regs, User};
use crate::privacy::ConsentDescriptor;

/// **一场竞价的上下文**
///
/// 竞价开始后只读，被所有 adapter 调用通过 `Arc` 共享。
#[derive(Debug, Clone)]
pub struct PreBidRequestContext {
    /// transaction id，同时作为发往 bidder 的 BidRequest.id
    pub tid: String,
    /// 单个 bidder 的超时预算（毫秒），同时是整场竞价的 tmax
    pub timeout_millis: u64,
    pub ip: Option<String>,
    pub ua: Option<String>,
    pub referer: Option<String>,
    pub domain: Option<String>,
    pub device: Option<Device>,
    pub app: Option<App>,
    pub user: Option<User>,
    pub regs: Option<Regs>,
    pub consent: ConsentDescriptor,
    pub is_debug: bool,
    /// 请求开始时间，用于计算总耗时
    pub start_time: Instant,
}

impl Default for PreBidRequestContext {
    fn default() -> Self {
        Self {
            tid: String::new(),
            timeout_millis: 0,
            ip: None,
            ua: None,
            referer: None,
            domain: None,
            device: None,
            app: None,
            user: None,
            regs: None,
            consent: ConsentDescriptor::default(),
            is_debug: false,
            start_time: Instant::now(),
        }
    }
}

impl PreBidRequestContext {
    /// 当前用户在请求中携带的 buyeruid（受 GDPR 同意约束）
    pub fn buyer_uid(&self) -> Option<&str> {
        if !self.consent.allows_user_ids() {
            return None;
        }
        self.user.as_ref().and_then(|u| u.buyeruid.as_deref())
    }
}
