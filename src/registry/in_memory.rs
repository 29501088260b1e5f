// ==========================================
// 挂片协议引擎 - 内存协议注册表
// ==========================================
// 职责: 保存已校验协议（保持注册顺序），支持 JSON 加载
// 红线: 注册时拒绝非法定义与重复 id，注册表中只存在合法协议
// ==========================================

use crate::domain::protocol::Protocol;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::builtin::default_protocol;
use super::error::RegistryError;
use super::validation::{normalize_protocol, validate_protocol};
use super::ProtocolRegistry;

struct RegistryState {
    protocols: Vec<Arc<Protocol>>,
    default: Arc<Protocol>,
}

pub struct InMemoryProtocolRegistry {
    state: RwLock<RegistryState>,
}

impl Default for InMemoryProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProtocolRegistry {
    /// 创建空注册表（默认协议为内置 1x1 协议）
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                protocols: Vec::new(),
                default: Arc::new(default_protocol()),
            }),
        }
    }

    /// 注册协议
    ///
    /// # 返回
    /// - Ok(()): 注册成功
    /// - Err(RegistryError::Invalid): 定义非法
    /// - Err(RegistryError::DuplicateId): id 已存在
    pub fn register(&self, protocol: Protocol) -> Result<(), RegistryError> {
        self.register_all(vec![protocol]).map(|_| ())
    }

    /// 批量注册（全部通过才写入）
    pub fn register_all(&self, protocols: Vec<Protocol>) -> Result<usize, RegistryError> {
        let mut prepared = Vec::with_capacity(protocols.len());
        for protocol in protocols {
            prepared.push(Arc::new(prepare(protocol)?));
        }

        let mut state = self.write()?;
        for (index, protocol) in prepared.iter().enumerate() {
            let clashes_existing = state.protocols.iter().any(|p| p.id == protocol.id);
            let clashes_batch = prepared[..index].iter().any(|p| p.id == protocol.id);
            if clashes_existing || clashes_batch {
                return Err(RegistryError::DuplicateId(protocol.id.clone()));
            }
        }

        let count = prepared.len();
        for protocol in prepared {
            debug!(protocol_id = %protocol.id, stages = protocol.stages.len(), "协议已注册");
            state.protocols.push(protocol);
        }
        Ok(count)
    }

    /// 替换默认协议（同样需通过校验）
    pub fn set_default(&self, protocol: Protocol) -> Result<(), RegistryError> {
        let protocol = Arc::new(prepare(protocol)?);
        let mut state = self.write()?;
        info!(protocol_id = %protocol.id, "默认协议已替换");
        state.default = protocol;
        Ok(())
    }

    /// 从 JSON 字符串注册（单个协议对象或协议数组）
    pub fn register_json_str(&self, json: &str) -> Result<usize, RegistryError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let protocols: Vec<Protocol> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };
        self.register_all(protocols)
    }

    /// 从 JSON 文件注册
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let count = self.register_json_str(&raw)?;
        info!(path = %path.display(), count, "协议文件加载完成");
        Ok(count)
    }

    /// 从目录注册全部 *.json（按文件名排序，保证注册顺序确定）
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize, RegistryError> {
        let dir = dir.as_ref();
        let io_err = |source| RegistryError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut total = 0;
        for file in files {
            total += self.load_file(&file)?;
        }
        Ok(total)
    }

    /// 移除协议
    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        let mut state = self.write()?;
        let before = state.protocols.len();
        state.protocols.retain(|p| p.id != id);
        Ok(state.protocols.len() != before)
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.protocols.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>, RegistryError> {
        self.state
            .write()
            .map_err(|e| RegistryError::LockPoisoned(e.to_string()))
    }
}

fn prepare(protocol: Protocol) -> Result<Protocol, RegistryError> {
    let protocol = normalize_protocol(protocol);
    let errors = validate_protocol(&protocol);
    if errors.is_empty() {
        Ok(protocol)
    } else {
        Err(RegistryError::Invalid {
            protocol_id: protocol.id.clone(),
            errors,
        })
    }
}

impl ProtocolRegistry for InMemoryProtocolRegistry {
    fn get_all(&self) -> Result<Vec<Arc<Protocol>>, RegistryError> {
        let state = self
            .state
            .read()
            .map_err(|e| RegistryError::LockPoisoned(e.to_string()))?;
        Ok(state.protocols.clone())
    }

    fn get_default(&self) -> Result<Arc<Protocol>, RegistryError> {
        let state = self
            .state
            .read()
            .map_err(|e| RegistryError::LockPoisoned(e.to_string()))?;
        Ok(state.default.clone())
    }
}
