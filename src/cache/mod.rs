// src/cache/mod.rs

//! 胜出出价的外部缓存（best-effort）。

pub mod client;

pub use client::{BidCacheRequest, BidCacheResponse, CacheClient, HttpCacheClient, PutObject, PutType};
