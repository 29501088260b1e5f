// ==========================================
// 挂片协议引擎 - 变更驱动的重算任务
// ==========================================
// 职责: 监听元数据版本号，在专用任务中驱动引擎重算
// 合并: watch 通道只保留最新版本号，突发变更合并为一次重算
// 红线: 同一线程在重算过程中再次触发（重入）直接返回错误，不阻塞
// 红线: 其他线程的并发重算在互斥锁上排队，依次执行
// ==========================================

use crate::domain::types::EngineState;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::protocol_engine::ProtocolEngine;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 可跨线程共享的引擎句柄
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<ProtocolEngine>>,
    /// 当前持有引擎锁的线程
    owner: Arc<Mutex<Option<ThreadId>>>,
}

/// 持锁线程守卫，离开作用域时清除
struct OwnerGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut owner) = self.0.lock() {
            *owner = None;
        }
    }
}

impl EngineHandle {
    pub fn new(engine: ProtocolEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    /// 触发重算
    ///
    /// # 返回
    /// - Err(ReentrantEvaluation): 当前线程已在重算中（例如在事件回调里再次触发）
    pub fn rerun(&self, generation: Option<u64>) -> EngineResult<EngineState> {
        self.locked(|engine| engine.run_match_generation(generation))?
    }

    /// 是否有线程正持有引擎（重算或锁内访问）
    pub fn is_evaluating(&self) -> bool {
        self.owner.lock().map(|owner| owner.is_some()).unwrap_or(false)
    }

    /// 在锁内访问引擎（导航、手动选择、查询）
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut ProtocolEngine) -> R) -> EngineResult<R> {
        self.locked(f)
    }

    pub fn state(&self) -> EngineResult<EngineState> {
        self.with_engine(|engine| engine.state())
    }

    fn locked<R>(&self, f: impl FnOnce(&mut ProtocolEngine) -> R) -> EngineResult<R> {
        let current = thread::current().id();
        if *self.lock_owner()? == Some(current) {
            return Err(EngineError::ReentrantEvaluation);
        }

        let mut engine = self
            .inner
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        *self.lock_owner()? = Some(current);
        let _guard = OwnerGuard(&self.owner);

        Ok(f(&mut engine))
    }

    fn lock_owner(&self) -> EngineResult<MutexGuard<'_, Option<ThreadId>>> {
        self.owner
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))
    }
}

/// 启动重算任务
///
/// # 参数
/// - handle: 引擎句柄
/// - changes: 元数据版本号通道（InMemoryMetadataProvider::subscribe）
///
/// # 返回
/// 任务句柄；通知通道关闭后任务自行结束
pub fn spawn_reevaluation(handle: EngineHandle, mut changes: watch::Receiver<u64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("重算任务已启动");
        loop {
            if changes.changed().await.is_err() {
                info!("元数据通知通道已关闭，重算任务结束");
                break;
            }
            let generation = *changes.borrow_and_update();

            let engine = handle.clone();
            match tokio::task::spawn_blocking(move || engine.rerun(Some(generation))).await {
                Ok(Ok(state)) => debug!(generation, state = %state, "重算完成"),
                Ok(Err(e)) => warn!(generation, error = %e, "重算失败"),
                Err(e) => error!(generation, error = %e, "重算任务异常退出"),
            }
        }
    })
}
