// ==========================================
// 挂片协议引擎 - 元数据提供者
// ==========================================
// 职责: 为引擎提供 检查 → 序列 → 实例 快照，并通知数据变更
// 通知: tokio watch 通道携带递增的版本号，突发变更只保留最新值
// ==========================================

mod error;

pub use error::MetadataError;

use crate::domain::metadata::Study;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::watch;

// ==========================================
// MetadataProvider Trait
// ==========================================
pub trait MetadataProvider: Send + Sync {
    /// 获取全部已加载检查（下标 0 为当前检查，其余为历史检查）
    fn get_studies(&self) -> Result<Vec<Study>, MetadataError>;

    /// 当前元数据版本号
    fn generation(&self) -> u64 {
        0
    }
}

// ==========================================
// InMemoryMetadataProvider
// ==========================================
pub struct InMemoryMetadataProvider {
    studies: RwLock<Vec<Study>>,
    generation: AtomicU64,
    notifier: watch::Sender<u64>,
}

impl InMemoryMetadataProvider {
    pub fn new(studies: Vec<Study>) -> Self {
        let (notifier, _) = watch::channel(0);
        Self {
            studies: RwLock::new(studies),
            generation: AtomicU64::new(0),
            notifier,
        }
    }

    /// 从 JSON 字符串加载（检查数组）
    pub fn from_json_str(json: &str) -> Result<Self, MetadataError> {
        let studies: Vec<Study> = serde_json::from_str(json)?;
        Ok(Self::new(studies))
    }

    /// 从 JSON 文件加载（检查数组）
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let provider = Self::from_json_str(&raw)?;
        tracing::info!(path = %path.display(), studies = provider.study_count(), "元数据加载完成");
        Ok(provider)
    }

    /// 订阅变更通知
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    /// 整体替换已加载检查
    ///
    /// # 返回
    /// 新的版本号
    pub fn replace_studies(&self, studies: Vec<Study>) -> Result<u64, MetadataError> {
        {
            let mut guard = self
                .studies
                .write()
                .map_err(|e| MetadataError::LockPoisoned(e.to_string()))?;
            *guard = studies;
        }
        Ok(self.bump())
    }

    /// 追加检查（例如加载历史检查）
    pub fn add_study(&self, study: Study) -> Result<u64, MetadataError> {
        {
            let mut guard = self
                .studies
                .write()
                .map_err(|e| MetadataError::LockPoisoned(e.to_string()))?;
            guard.push(study);
        }
        Ok(self.bump())
    }

    pub fn study_count(&self) -> usize {
        self.studies.read().map(|g| g.len()).unwrap_or(0)
    }

    fn bump(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.notifier.send_replace(generation);
        tracing::debug!(generation, "元数据已变更");
        generation
    }
}

impl Default for InMemoryMetadataProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MetadataProvider for InMemoryMetadataProvider {
    fn get_studies(&self) -> Result<Vec<Study>, MetadataError> {
        let guard = self
            .studies
            .read()
            .map_err(|e| MetadataError::LockPoisoned(e.to_string()))?;
        Ok(guard.clone())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
