// src/error.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 单个 bidder 调用失败的类别，写入 bidder_status 调试信息
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameters,
    NoImpressions,
    InvalidVideoParams,
    UnknownAdUnitCode,
    UnsupportedBidder,
    CircuitOpen,
    BreakerFailure,
    Timeout,
    TransportError,
    CacheUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::NoImpressions => "no_impressions",
            ErrorKind::InvalidVideoParams => "invalid_video_params",
            ErrorKind::UnknownAdUnitCode => "unknown_ad_unit_code",
            ErrorKind::UnsupportedBidder => "unsupported_bidder",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::BreakerFailure => "breaker_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::CacheUnavailable => "cache_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// **bidder 级别错误**
///
/// 所有错误都归属于某一个 bidder，在 AdapterInvoker 边界被转换成该 bidder 的 outcome，
/// 不会中断整场竞价。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BidderError {
    #[error("{0}")]
    InvalidParameters(String),

    #[error("{0}")]
    NoImpressions(String),

    #[error("{0}")]
    InvalidVideoParams(String),

    #[error("{0}")]
    UnknownAdUnitCode(String),

    #[error("Unsupported bidder: {0}")]
    UnsupportedBidder(String),

    #[error("circuit breaker is open for bidder '{0}'")]
    CircuitOpen(String),

    #[error("circuit breaker bookkeeping failed: {0}")]
    BreakerFailure(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),
}

impl BidderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BidderError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            BidderError::NoImpressions(_) => ErrorKind::NoImpressions,
            BidderError::InvalidVideoParams(_) => ErrorKind::InvalidVideoParams,
            BidderError::UnknownAdUnitCode(_) => ErrorKind::UnknownAdUnitCode,
            BidderError::UnsupportedBidder(_) => ErrorKind::UnsupportedBidder,
            BidderError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            BidderError::BreakerFailure(_) => ErrorKind::BreakerFailure,
            BidderError::Timeout(_) => ErrorKind::Timeout,
            BidderError::Transport(_) => ErrorKind::TransportError,
        }
    }
}

/// 竞价级别错误：请求本身无法被任何 bidder 处理时才会出现
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuctionError {
    #[error("invalid auction context: {0}")]
    InvalidContext(String),

    #[error("invalid auction request: {0}")]
    InvalidRequest(String),
}

/// 缓存调用失败，永远是 best-effort，不影响竞价结果
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache returned {returned} ids for {expected} puts")]
    CountMismatch { expected: usize, returned: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
