// ==========================================
// 挂片协议引擎 - 事件发布
// ==========================================
// 职责: 定义协议事件发布 trait，宿主实现订阅
// 说明: 引擎只依赖 trait，不依赖具体的 UI/消息总线
// ==========================================

use crate::domain::match_result::MatchResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

// ==========================================
// 协议事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolEventType {
    /// 匹配完成
    ProtocolMatched,
    /// 协议已应用
    ProtocolApplied,
    /// 阶段切换
    StageChanged,
}

impl ProtocolEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            ProtocolEventType::ProtocolMatched => "ProtocolMatched",
            ProtocolEventType::ProtocolApplied => "ProtocolApplied",
            ProtocolEventType::StageChanged => "StageChanged",
        }
    }
}

/// 一次匹配运行的元信息（不进入 MatchResult）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// 触发本次运行的元数据版本（显式调用时为 None）
    pub generation: Option<u64>,
}

impl MatchRun {
    pub fn start(generation: Option<u64>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            generation,
        }
    }
}

/// 协议事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ProtocolEvent {
    #[serde(rename_all = "camelCase")]
    ProtocolMatched {
        run: MatchRun,
        results: Vec<MatchResult>,
    },
    #[serde(rename_all = "camelCase")]
    ProtocolApplied {
        protocol_id: String,
        stage_index: usize,
        /// 是否为默认协议回退
        fallback: bool,
    },
    #[serde(rename_all = "camelCase")]
    StageChanged {
        protocol_id: String,
        stage_index: usize,
    },
}

impl ProtocolEvent {
    pub fn event_type(&self) -> ProtocolEventType {
        match self {
            ProtocolEvent::ProtocolMatched { .. } => ProtocolEventType::ProtocolMatched,
            ProtocolEvent::ProtocolApplied { .. } => ProtocolEventType::ProtocolApplied,
            ProtocolEvent::StageChanged { .. } => ProtocolEventType::StageChanged,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 协议事件发布者
///
/// 发布失败只记录告警，不影响引擎状态
pub trait ProtocolEventPublisher: Send + Sync {
    /// 发布协议事件
    ///
    /// # 返回
    /// - Ok(()): 已发布
    /// - Err: 发布失败
    fn publish(&self, event: ProtocolEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ProtocolEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ProtocolEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!("NoOpEventPublisher: 跳过事件发布 - event_type={}", event.event_type().as_str());
        Ok(())
    }
}

/// 可选的事件发布者包装
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn ProtocolEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn ProtocolEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: ProtocolEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - event_type={}",
                    event.event_type().as_str()
                );
                Ok(())
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

/// 通道事件发布者（tokio 无界通道，供异步订阅者消费）
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::UnboundedSender<ProtocolEvent>,
}

impl ChannelEventPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProtocolEventPublisher for ChannelEventPublisher {
    fn publish(&self, event: ProtocolEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.sender
            .send(event)
            .map_err(|e| format!("事件通道已关闭: {}", e.0.event_type().as_str()).into())
    }
}

/// 记录型事件发布者（测试与诊断用）
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<ProtocolEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录事件的副本
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, event_type: ProtocolEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl ProtocolEventPublisher for RecordingEventPublisher {
    fn publish(&self, event: ProtocolEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self.events.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        guard.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_changed() -> ProtocolEvent {
        ProtocolEvent::StageChanged {
            protocol_id: "P1".to_string(),
            stage_index: 1,
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(stage_changed()).unwrap();
        assert_eq!(json["type"], "stageChanged");
        assert_eq!(json["protocolId"], "P1");
        assert_eq!(json["stageIndex"], 1);
    }

    #[test]
    fn test_noop_publisher() {
        assert!(NoOpEventPublisher.publish(stage_changed()).is_ok());
    }

    #[test]
    fn test_optional_publisher_none() {
        let publisher = OptionalEventPublisher::none();
        assert!(!publisher.is_configured());
        assert!(publisher.publish(stage_changed()).is_ok());
    }

    #[test]
    fn test_optional_publisher_with_recording() {
        let recording = Arc::new(RecordingEventPublisher::new());
        let publisher = OptionalEventPublisher::with_publisher(recording.clone());
        assert!(publisher.is_configured());

        publisher.publish(stage_changed()).unwrap();
        assert_eq!(recording.count_of(ProtocolEventType::StageChanged), 1);
        recording.clear();
        assert!(recording.events().is_empty());
    }

    #[test]
    fn test_channel_publisher_delivers_and_reports_closed() {
        let (publisher, mut receiver) = ChannelEventPublisher::new();
        publisher.publish(stage_changed()).unwrap();
        assert_eq!(receiver.try_recv().unwrap(), stage_changed());

        drop(receiver);
        assert!(publisher.publish(stage_changed()).is_err());
    }
}
