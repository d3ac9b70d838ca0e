// src/adapters/mod.rs

//! bidder adapter 插件边界。
//!
//! 每个 bidder 只需要实现 `Adapter`，并以唯一名称注册到 `AdapterRegistry`，
//! 协调器通过名称查找，无需改动协调器本身。

pub mod indexexchange;
pub mod openrtb;
pub mod pubmatic;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::config_manager::AppConfig;
use crate::error::{BidderError, ConfigError};
use crate::model::{AdapterRequest, Bid, ExchangeCall, HttpRequest, PreBidRequestContext};

pub use indexexchange::IndexExchangeAdapter;
pub use pubmatic::PubmaticAdapter;

/// **bidder 协议转换契约**
///
/// 两个方法都是纯函数：不持有隐藏状态，不访问网络，网络调用由 invoker 完成。
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// 把归一化的广告位请求转换成一个或多个出站请求
    fn build_requests(
        &self,
        request: &AdapterRequest,
        context: &PreBidRequestContext,
    ) -> Result<Vec<HttpRequest>, BidderError>;

    /// 把 bidder 响应转换回归一化出价；响应为空时返回空列表
    fn extract_bids(&self, request: &AdapterRequest, call: &ExchangeCall) -> Result<Vec<Bid>, BidderError>;
}

/// bidder 名称 → adapter 实现
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Result<(), ConfigError> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(ConfigError::Invalid(format!("adapter '{}' registered twice", name)));
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 根据配置构建已启用的 adapter
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (name, settings) in config.enabled_adapters() {
            let adapter: Arc<dyn Adapter> = match name.as_str() {
                pubmatic::BIDDER => Arc::new(PubmaticAdapter::new(&settings.endpoint)?),
                indexexchange::BIDDER => Arc::new(IndexExchangeAdapter::new(&settings.endpoint)?),
                other => return Err(ConfigError::Invalid(format!("unknown adapter '{}'", other))),
            };
            registry.register(adapter)?;
        }
        Ok(registry)
    }
}
