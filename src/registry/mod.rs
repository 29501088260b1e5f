// ==========================================
// 挂片协议引擎 - 协议注册表层
// ==========================================
// 职责: 协议的注册、校验、查询、JSON 加载
// 红线: 不含匹配逻辑
// ==========================================

pub mod builtin;
pub mod error;
pub mod in_memory;
pub mod validation;

pub use builtin::{default_protocol, DEFAULT_PROTOCOL_ID};
pub use error::{ProtocolValidationError, RegistryError};
pub use in_memory::InMemoryProtocolRegistry;
pub use validation::{normalize_protocol, validate_protocol};

use crate::domain::protocol::Protocol;
use std::sync::Arc;

// ==========================================
// ProtocolRegistry Trait
// ==========================================
pub trait ProtocolRegistry: Send + Sync {
    /// 全部已注册协议（按注册顺序）
    fn get_all(&self) -> Result<Vec<Arc<Protocol>>, RegistryError>;

    /// 默认协议（无合格协议时回退）
    fn get_default(&self) -> Result<Arc<Protocol>, RegistryError>;

    /// 按 id 查找（含默认协议）
    fn get(&self, id: &str) -> Result<Option<Arc<Protocol>>, RegistryError> {
        if let Some(found) = self.get_all()?.into_iter().find(|p| p.id == id) {
            return Ok(Some(found));
        }
        let default = self.get_default()?;
        Ok(if default.id == id { Some(default) } else { None })
    }
}
