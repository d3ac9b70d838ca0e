// src/bidding/breaker.rs

//! 按 bidder 名称隔离的熔断器。
//!
//! 状态流转：closed → open → half_open → closed。
//! 同一个 bidder 的状态变更通过一把互斥锁串行化，不同 bidder 之间互不阻塞。
//! 状态变化通过 broadcast 通道发布 `BreakerEvent`，每次流转只发布一次。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::config_manager::BreakerSettings;
use crate::error::BidderError;

/// 单个 bidder 的熔断配置
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// 打开熔断前允许的失败次数
    pub opening_threshold: u32,
    /// 失败聚集窗口：距上次失败超过该时长，失败计数清零
    pub opening_interval_ms: u64,
    /// 打开后多久允许一次 half-open 探测
    pub closing_interval_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            opening_threshold: 5,
            opening_interval_ms: 60_000,
            closing_interval_ms: 60_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Open,
    HalfOpen,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerEvent {
    pub adapter: String,
    pub transition: Transition,
}

/// 熔断器使用的时钟。读取失败视为记账失败，会替代原始错误返回给调用方。
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Result<u64, String>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Result<u64, String> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| format!("system clock is before unix epoch: {}", e))
    }
}

/// 手动推进的时钟，测试与回放场景使用
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    broken: AtomicBool,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
            broken: AtomicBool::new(false),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// 让之后的读取全部失败，模拟时钟 / 存储故障
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Result<u64, String> {
        if self.broken.load(Ordering::SeqCst) {
            return Err("clock unavailable".to_string());
        }
        Ok(self.now.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure_ms: Option<u64>,
    opened_at_ms: u64,
    probe_in_flight: bool,
}

struct BreakerCore {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    events: broadcast::Sender<BreakerEvent>,
}

impl BreakerCore {
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> Result<u64, BidderError> {
        self.clock.now_millis().map_err(BidderError::BreakerFailure)
    }

    /// 调用方持有锁时发布，保证同一 bidder 的事件顺序与状态变更顺序一致
    fn emit(&self, transition: Transition) {
        info!(adapter = %self.name, ?transition, "circuit breaker state changed");
        // 没有订阅者时 send 返回 Err，忽略即可
        let _ = self.events.send(BreakerEvent {
            adapter: self.name.clone(),
            transition,
        });
    }

    /// closed 状态下距上次失败超过 opening_interval 时清零计数
    fn decay(&self, st: &mut BreakerState, now: u64) {
        if st.state != CircuitState::Closed || st.failures == 0 {
            return;
        }
        if let Some(last) = st.last_failure_ms {
            if now.saturating_sub(last) > self.config.opening_interval_ms {
                debug!(adapter = %self.name, stale_failures = st.failures, "resetting stale failure counter");
                st.failures = 0;
            }
        }
    }

    /// 返回是否为 half-open 探测调用
    fn admit(&self) -> Result<bool, BidderError> {
        let now = self.now()?;
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => {
                self.decay(&mut st, now);
                Ok(false)
            }
            CircuitState::Open => {
                if now.saturating_sub(st.opened_at_ms) >= self.config.closing_interval_ms {
                    st.state = CircuitState::HalfOpen;
                    st.probe_in_flight = true;
                    self.emit(Transition::HalfOpen);
                    Ok(true)
                } else {
                    Err(BidderError::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if st.probe_in_flight {
                    Err(BidderError::CircuitOpen(self.name.clone()))
                } else {
                    st.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut st = self.lock();
        match st.state {
            CircuitState::HalfOpen if probe => {
                st.state = CircuitState::Closed;
                st.failures = 0;
                st.probe_in_flight = false;
                self.emit(Transition::Close);
            }
            CircuitState::Closed => st.failures = 0,
            _ => {}
        }
    }

    fn record_failure(&self, probe: bool) -> Result<(), BidderError> {
        let now = self.now()?;
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => {
                self.decay(&mut st, now);
                st.failures = st.failures.saturating_add(1);
                st.last_failure_ms = Some(now);
                if st.failures >= self.config.opening_threshold {
                    st.state = CircuitState::Open;
                    st.opened_at_ms = now;
                    self.emit(Transition::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                st.state = CircuitState::Open;
                st.opened_at_ms = now;
                st.probe_in_flight = false;
                st.last_failure_ms = Some(now);
                self.emit(Transition::Open);
            }
            // 熔断打开前就已放行的慢调用，只更新失败时间
            _ => st.last_failure_ms = Some(now),
        }
        Ok(())
    }

    /// 探测调用在记账前被放弃（future 被 drop 或记账任务失败），重新打开熔断
    fn release_probe(&self) {
        let mut st = self.lock();
        if st.state == CircuitState::HalfOpen && st.probe_in_flight {
            st.state = CircuitState::Open;
            st.probe_in_flight = false;
            self.emit(Transition::Open);
        }
    }
}

/// 放行凭证；探测调用未完成记账就被丢弃时归还探测名额
struct Permit {
    core: Arc<BreakerCore>,
    probe: bool,
    settled: bool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.core.release_probe();
        }
    }
}

/// **单个 bidder 的熔断器**，克隆后共享同一份状态
#[derive(Clone)]
pub struct CircuitBreaker {
    core: Arc<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(
        name: &str,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<BreakerEvent>,
    ) -> Self {
        Self {
            core: Arc::new(BreakerCore {
                name: name.to_string(),
                config,
                clock,
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    failures: 0,
                    last_failure_ms: None,
                    opened_at_ms: 0,
                    probe_in_flight: false,
                }),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.core.lock().failures
    }

    /// 在熔断控制下执行一次操作。
    ///
    /// 熔断打开时直接返回 `CircuitOpen`，不会调用 `operation`。
    /// 操作成功时先完成记账再返回；操作失败时先在阻塞线程池里完成记账，
    /// 记账本身失败则以记账错误替代原始错误返回。
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, BidderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BidderError>>,
    {
        let probe = self.core.admit()?;
        let mut permit = Permit {
            core: Arc::clone(&self.core),
            probe,
            settled: false,
        };

        match operation().await {
            Ok(value) => {
                permit.core.record_success(permit.probe);
                permit.settled = true;
                Ok(value)
            }
            Err(err) => {
                let core = Arc::clone(&permit.core);
                let bookkeeping = task::spawn_blocking(move || core.record_failure(probe))
                    .await
                    .map_err(|e| BidderError::BreakerFailure(format!("bookkeeping task failed: {}", e)))
                    .and_then(|result| result);

                match bookkeeping {
                    Ok(()) => {
                        permit.settled = true;
                        Err(err)
                    }
                    Err(secondary) => {
                        warn!(
                            adapter = %self.core.name,
                            original_error = %err,
                            error = %secondary,
                            "circuit breaker bookkeeping failed"
                        );
                        Err(secondary)
                    }
                }
            }
        }
    }
}

/// **进程级熔断器表**
///
/// 每个 bidder 名称首次使用时惰性创建，进程生命周期内不会删除。
pub struct CircuitBreakers {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreakers {
    pub fn new(settings: BreakerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            settings,
            clock,
            breakers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn get(&self, name: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new(
                    name,
                    self.settings.for_adapter(name),
                    Arc::clone(&self.clock),
                    self.events.clone(),
                )
            })
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    pub fn state_of(&self, name: &str) -> Option<CircuitState> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers.get(name).map(CircuitBreaker::state)
    }
}
