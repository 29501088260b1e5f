// ==========================================
// 挂片协议引擎 - 元数据层错误类型
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("元数据文件读取失败 (path={path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("元数据解析失败: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("元数据不可用: {0}")]
    Unavailable(String),

    #[error("元数据锁获取失败: {0}")]
    LockPoisoned(String),
}
