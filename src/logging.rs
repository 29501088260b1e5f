// ==========================================
// 日志系统初始化
// ==========================================
// 使用 tracing 和 tracing-subscriber
// 支持环境变量配置日志级别，支持文本/JSON 两种输出
// ==========================================

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TEXT" => Ok(LogFormat::Text),
            "JSON" => Ok(LogFormat::Json),
            other => Err(format!("未知日志格式: {}", other)),
        }
    }
}

fn env_filter() -> EnvFilter {
    // 从环境变量读取日志级别，默认为 info
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化日志系统（文本格式）
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=debug 或 RUST_LOG=hanging_protocol_engine=trace
///
/// # 示例
/// ```no_run
/// use hanging_protocol_engine::logging;
/// logging::init();
/// ```
pub fn init() {
    init_with_format(LogFormat::Text);
}

/// 初始化日志系统（JSON 格式，便于日志采集）
pub fn init_json() {
    init_with_format(LogFormat::Json);
}

/// 按指定格式初始化日志系统
///
/// 重复初始化时静默忽略
pub fn init_with_format(format: LogFormat) {
    let builder = fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// 初始化测试环境的日志系统
///
/// 使用更详细的日志级别，便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
