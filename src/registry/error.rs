// ==========================================
// 挂片协议引擎 - 注册表错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 协议校验错误（注册时发现的定义问题）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolValidationError {
    #[error("协议 id 为空")]
    MissingId,

    #[error("协议没有阶段")]
    NoStages,

    #[error("布局为空: stage={stage_index}")]
    EmptyGrid { stage_index: usize },

    #[error("视口数量与布局槽位不一致: stage={stage_index}, expected={expected}, actual={actual}")]
    ViewportCountMismatch {
        stage_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("视口位置越界: stage={stage_index}, viewport={viewport_index}, row={row}, column={column}")]
    PositionOutOfBounds {
        stage_index: usize,
        viewport_index: usize,
        row: u32,
        column: u32,
    },

    #[error("视口位置重复: stage={stage_index}, row={row}, column={column}")]
    DuplicatePosition { stage_index: usize, row: u32, column: u32 },

    #[error("规则属性为空: {location}")]
    EmptyAttribute { location: String },

    #[error("规则权重非法 ({location}): weight={weight}")]
    InvalidWeight { location: String, weight: f64 },

    #[error("范围约束上下界颠倒 ({location}): min={min}, max={max}")]
    InvertedRange { location: String, min: f64, max: f64 },

    #[error("正则表达式非法 ({location}): pattern={pattern}, {message}")]
    InvalidRegex {
        location: String,
        pattern: String,
        message: String,
    },
}

/// 注册表错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("协议校验失败 (protocol_id={protocol_id}): {}", summarize(.errors))]
    Invalid {
        protocol_id: String,
        errors: Vec<ProtocolValidationError>,
    },

    #[error("协议 id 重复: {0}")]
    DuplicateId(String),

    #[error("协议不存在: {0}")]
    NotFound(String),

    #[error("协议文件读取失败 (path={path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("协议 JSON 解析失败: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("注册表锁获取失败: {0}")]
    LockPoisoned(String),
}

impl RegistryError {
    /// 校验错误列表（非校验错误为空）
    pub fn validation_errors(&self) -> &[ProtocolValidationError] {
        match self {
            RegistryError::Invalid { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn summarize(errors: &[ProtocolValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
