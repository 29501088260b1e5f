// ==========================================
// 挂片协议引擎 - 领域类型定义
// ==========================================
// 职责: 属性值、实体层级、阶段状态、引擎状态
// ==========================================

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

// ==========================================
// 属性值 (Attribute Value)
// ==========================================
// 元数据属性的统一表示，JSON 形态直接映射
// Null 在解析阶段视为"缺失"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    /// 数值视图
    ///
    /// 文本会尝试按数字解析（DICOM IS/DS 常以字符串形式出现）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            AttrValue::List(items) if items.len() == 1 => items[0].as_f64(),
            _ => None,
        }
    }

    /// 文本视图
    ///
    /// 列表、映射与 Null 没有文本视图
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            AttrValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            AttrValue::Number(n) => Some(Cow::Owned(format_number(*n))),
            AttrValue::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            _ => None,
        }
    }

    /// 按路径段向下取值
    ///
    /// - Map: 按键取值
    /// - List: 段为数字时按下标取值
    pub fn get_segment(&self, segment: &str) -> Option<&AttrValue> {
        match self {
            AttrValue::Map(map) => map.get(segment),
            AttrValue::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }
}

/// 整数值去掉小数点，保证 "1" 与 1.0 的文本形式一致
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => write!(f, "null"),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Number(n) => write!(f, "{}", format_number(*n)),
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join("\\"))
            }
            AttrValue::Map(map) => write!(f, "{{{} keys}}", map.len()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(values: Vec<T>) -> Self {
        AttrValue::List(values.into_iter().map(Into::into).collect())
    }
}

// ==========================================
// 实体层级 (Entity Level)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLevel {
    Protocol, // 协议级规则（针对检查评估）
    Study,    // 检查
    Series,   // 序列
    Instance, // 实例/图像
}

impl fmt::Display for EntityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityLevel::Protocol => write!(f, "PROTOCOL"),
            EntityLevel::Study => write!(f, "STUDY"),
            EntityLevel::Series => write!(f, "SERIES"),
            EntityLevel::Instance => write!(f, "INSTANCE"),
        }
    }
}

// ==========================================
// 阶段状态 (Stage Status)
// ==========================================
// Disabled: 已填充视口不足，不可显示
// Passive: 可手动切换，但不作为默认
// Enabled: 满足默认显示条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Enabled,
    Passive,
    Disabled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Enabled => write!(f, "ENABLED"),
            StageStatus::Passive => write!(f, "PASSIVE"),
            StageStatus::Disabled => write!(f, "DISABLED"),
        }
    }
}

// ==========================================
// 引擎状态 (Engine State)
// ==========================================
// Uninitialized → Idle → Matching → Applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// 构造前的状态；ProtocolEngine::new 即完成 Uninitialized → Idle，已构造的引擎不会处于此状态
    Uninitialized,
    Idle,
    Matching,
    Applied,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "UNINITIALIZED"),
            EngineState::Idle => write!(f, "IDLE"),
            EngineState::Matching => write!(f, "MATCHING"),
            EngineState::Applied => write!(f, "APPLIED"),
        }
    }
}
