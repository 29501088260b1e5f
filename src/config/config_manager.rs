// ==========================================
// 挂片协议引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写、快照/恢复
// 存储: JSON 文件（扁平 key → value）
// 缺省: 文件不存在时全部使用默认值
// ==========================================

use crate::config::engine_config_trait::EngineConfigReader;
use crate::logging::LogFormat;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// 配置层错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件读写失败 (path={path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("配置解析失败: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("配置锁获取失败: {0}")]
    LockPoisoned(String),
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
#[derive(Debug, Default)]
pub struct ConfigManager {
    values: RwLock<BTreeMap<String, String>>,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// 创建空配置（全部使用默认值）
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文件加载
    ///
    /// # 参数
    /// - path: 配置文件路径（不存在时返回空配置）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Ok(Self {
                values: RwLock::new(BTreeMap::new()),
                source: Some(path.to_path_buf()),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let values = parse_flat_json(&raw)?;
        tracing::info!(path = %path.display(), keys = values.len(), "配置加载完成");

        Ok(Self {
            values: RwLock::new(values),
            source: Some(path.to_path_buf()),
        })
    }

    /// 从默认位置加载（<config_dir>/hanging-protocols/engine.json）
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) => Self::from_file(path),
            None => {
                tracing::warn!("无法确定系统配置目录，使用默认配置");
                Ok(Self::new())
            }
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// 读取配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let values = self
            .values
            .read()
            .map_err(|e| ConfigError::LockPoisoned(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    /// 写入配置值（仅内存，调用 save 落盘）
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut values = self
            .values
            .write()
            .map_err(|e| ConfigError::LockPoisoned(e.to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, ConfigError> {
        let values = self
            .values
            .read()
            .map_err(|e| ConfigError::LockPoisoned(e.to_string()))?;
        Ok(serde_json::to_string(&*values)?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    ///
    /// # 注意
    /// - 覆盖同名配置，快照中不存在的配置保持不变
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> Result<usize, ConfigError> {
        let snapshot = parse_flat_json(snapshot_json)?;
        let mut values = self
            .values
            .write()
            .map_err(|e| ConfigError::LockPoisoned(e.to_string()))?;
        let count = snapshot.len();
        values.extend(snapshot);
        Ok(count)
    }

    /// 保存到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let snapshot = {
            let values = self
                .values
                .read()
                .map_err(|e| ConfigError::LockPoisoned(e.to_string()))?;
            serde_json::to_string_pretty(&*values)?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, snapshot).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let value = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };
        match value.trim().to_uppercase().as_str() {
            "TRUE" | "1" | "YES" => Ok(true),
            "FALSE" | "0" | "NO" => Ok(false),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %value,
                    "布尔配置格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

/// 默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hanging-protocols").join("engine.json"))
}

/// 解析扁平 JSON 对象；非字符串值按其 JSON 文本保存
fn parse_flat_json(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)?;
    Ok(parsed
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}

// ==========================================
// EngineConfigReader Trait 实现
// ==========================================
impl EngineConfigReader for ConfigManager {
    fn get_default_protocol_id(&self) -> Result<Option<String>, ConfigError> {
        Ok(self
            .get_config_value(config_keys::DEFAULT_PROTOCOL_ID)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    fn get_prefer_displayed_series(&self) -> Result<bool, ConfigError> {
        self.get_bool_or_default(config_keys::PREFER_DISPLAYED_SERIES, true)
    }

    fn get_skip_non_image_instances(&self) -> Result<bool, ConfigError> {
        self.get_bool_or_default(config_keys::SKIP_NON_IMAGE_INSTANCES, true)
    }

    fn get_log_format(&self) -> Result<LogFormat, ConfigError> {
        let value = self.get_config_or_default(config_keys::LOG_FORMAT, "text")?;
        Ok(value.parse::<LogFormat>().unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::LOG_FORMAT,
                raw_value = %value,
                "日志格式配置错误，使用 text"
            );
            LogFormat::Text
        }))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 协议选择
    pub const DEFAULT_PROTOCOL_ID: &str = "default_protocol_id";

    // 候选排序
    pub const PREFER_DISPLAYED_SERIES: &str = "prefer_displayed_series";
    pub const SKIP_NON_IMAGE_INSTANCES: &str = "skip_non_image_instances";

    // 日志
    pub const LOG_FORMAT: &str = "log_format";
}
