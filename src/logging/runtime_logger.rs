// src/logging/runtime_logger.rs

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration as StdDuration, SystemTime};

use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Duration};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;

use crate::logging::local_timestamp;

/// 日志保留时长
const RETENTION_HOURS: u64 = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [LogLevel::Trace, LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// 单条日志消息
pub(crate) struct LogEntry {
    level: LogLevel,
    content: String,
}

/// 运行日志管理器（RuntimeLogger）
/// 将运行时日志按日志级别分流到不同的日志文件中。
pub struct RuntimeLogger {
    sender: Mutex<Option<Sender<LogEntry>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeLogger {
    /// 创建一个新的 RuntimeLogger
    ///
    /// - `log_dir`: 日志文件存放目录
    /// - `file_prefix`: 文件前缀，例如 "runtime"（最终文件名形如 runtime_info.json 等）
    /// - `buffer_size`: mpsc 通道缓冲区大小
    /// - `batch_size`: 每个日志级别批量写入的日志条数
    /// - `flush_interval`: 定时刷新日志的时间间隔（毫秒）
    pub fn new(
        log_dir: &str,
        file_prefix: &str,
        buffer_size: usize,
        batch_size: usize,
        flush_interval: u64,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let log_files: HashMap<LogLevel, Arc<RollingFileAppender>> = LogLevel::ALL
            .iter()
            .map(|level| {
                let file_name = format!("{}_{}.json", file_prefix, level.as_str().to_lowercase());
                (*level, Arc::new(rolling::hourly(log_dir, file_name)))
            })
            .collect();

        let writer = tokio::spawn(Self::background_log_writer(log_files, receiver, batch_size, flush_interval));

        // 每小时扫描一次，清理过期日志
        let dir = log_dir.to_string();
        tokio::spawn(async move {
            loop {
                Self::cleanup_old_logs(&dir, RETENTION_HOURS).await;
                time::sleep(Duration::from_secs(3600)).await;
            }
        });

        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            writer: tokio::sync::Mutex::new(Some(writer)),
        })
    }

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        let content = json!({
            "timestamp": local_timestamp(),
            "level": level.as_str(),
            "message": message
        })
        .to_string();
        LogEntry { level, content }
    }

    fn sender(&self) -> Option<Sender<LogEntry>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 记录运行日志；关闭之后的日志会被丢弃
    pub async fn log(&self, level: LogLevel, message: &str) {
        let Some(sender) = self.sender() else {
            return;
        };
        if let Err(e) = sender.send(Self::entry(level, message)).await {
            eprintln!("Failed to send runtime log message: {}", e);
        }
    }

    /// 不等待的写入：队列满或已关闭时丢弃并返回 false
    pub fn try_log(&self, level: LogLevel, message: &str) -> bool {
        let Some(sender) = self.sender() else {
            return false;
        };
        match sender.try_send(Self::entry(level, message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(level = level.as_str(), "runtime log queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 没有后台写入任务的 logger，队列只进不出
    #[cfg(test)]
    pub(crate) fn stalled(capacity: usize) -> (Arc<Self>, Receiver<LogEntry>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let logger = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            writer: tokio::sync::Mutex::new(None),
        });
        (logger, receiver)
    }

    /// 后台日志写入任务；通道关闭后写完剩余缓冲再退出
    async fn background_log_writer(
        log_files: HashMap<LogLevel, Arc<RollingFileAppender>>,
        mut receiver: Receiver<LogEntry>,
        batch_size: usize,
        flush_interval: u64,
    ) {
        let mut buffers: HashMap<LogLevel, Vec<String>> = HashMap::new();
        let mut interval = time::interval(Duration::from_millis(flush_interval));
        loop {
            tokio::select! {
                entry = receiver.recv() => {
                    let Some(entry) = entry else {
                        Self::flush_all(&log_files, &mut buffers).await;
                        break;
                    };
                    let buffer = buffers.entry(entry.level).or_default();
                    buffer.push(entry.content);
                    if buffer.len() >= batch_size {
                        let batch = std::mem::take(buffer);
                        if let Some(appender) = log_files.get(&entry.level) {
                            Self::write_logs_to_disk(Arc::clone(appender), batch).await;
                        }
                    }
                },
                _ = interval.tick() => {
                    Self::flush_all(&log_files, &mut buffers).await;
                }
            }
        }
    }

    async fn flush_all(
        log_files: &HashMap<LogLevel, Arc<RollingFileAppender>>,
        buffers: &mut HashMap<LogLevel, Vec<String>>,
    ) {
        for (level, buffer) in buffers.iter_mut() {
            if buffer.is_empty() {
                continue;
            }
            let batch = std::mem::take(buffer);
            if let Some(appender) = log_files.get(level) {
                Self::write_logs_to_disk(Arc::clone(appender), batch).await;
            }
        }
    }

    async fn write_logs_to_disk(file: Arc<RollingFileAppender>, batch: Vec<String>) {
        let content = batch.join("\n") + "\n";
        let written = task::spawn_blocking(move || {
            let mut writer = file.make_writer();
            writer.write_all(content.as_bytes())
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Failed to write runtime logs: {}", e),
            Err(e) => eprintln!("Runtime log writer task failed: {}", e),
        }
    }

    async fn cleanup_old_logs(log_dir: &str, retention_hours: u64) {
        let retention = StdDuration::from_secs(retention_hours * 3600);
        let now = SystemTime::now();
        let mut dir = match tokio::fs::read_dir(log_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Failed to read log directory {}: {}", log_dir, e);
                return;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() > retention {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    eprintln!("Failed to delete old log file {:?}: {}", path, e);
                }
            }
        }
    }

    /// 关闭通道并等待后台任务把缓冲写完
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = self.writer.lock().await.take() {
            if let Err(e) = handle.await {
                eprintln!("Runtime log writer task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(dir: &std::path::Path, prefix: &str) -> String {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
            .map(|e| std::fs::read_to_string(e.path()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn shutdown_drains_queue_into_level_files() {
        let dir = std::env::temp_dir().join(format!("rust-prebid-log-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let logger = RuntimeLogger::new(dir.to_str().unwrap(), "runtime", 64, 100, 60_000);

        logger.log(LogLevel::Info, "auction finished").await;
        logger.log(LogLevel::Warn, "breaker opened").await;
        logger.shutdown().await;
        logger.log(LogLevel::Info, "dropped after shutdown").await;

        let info = read_all(&dir, "runtime_info.json");
        assert!(info.contains("auction finished"));
        assert!(!info.contains("dropped after shutdown"));
        assert!(read_all(&dir, "runtime_warn.json").contains("breaker opened"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn try_log_drops_when_queue_is_full() {
        let (logger, _receiver) = RuntimeLogger::stalled(2);
        assert!(logger.try_log(LogLevel::Info, "one"));
        assert!(logger.try_log(LogLevel::Info, "two"));
        assert!(!logger.try_log(LogLevel::Info, "three"));

        logger.shutdown().await;
        assert!(!logger.try_log(LogLevel::Info, "after shutdown"));
    }
}
