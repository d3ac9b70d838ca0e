// src/lib.rs

pub mod adapters;
pub mod api;
pub mod bidding;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod mock_bidder;
pub mod model;
pub mod openrtb;
pub mod privacy;
