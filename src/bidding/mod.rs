// src/bidding/mod.rs

pub mod bidder_client;
pub mod breaker;
pub mod engine;
pub mod invoker;

pub use bidder_client::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use breaker::{BreakerEvent, CircuitBreaker, CircuitBreakerConfig, CircuitBreakers, CircuitState, Transition};
pub use engine::{AuctionResult, ExchangeCoordinator};
pub use invoker::{AdapterInvoker, AdapterResult, BidderOutcome};
