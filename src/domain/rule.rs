// ==========================================
// 挂片协议引擎 - 匹配规则与约束
// ==========================================
// 职责: 规则 = 属性路径 + 约束 + 必需标记 + 权重
// 约束为封闭枚举，predicate 仅支持程序化构建
// ==========================================

use crate::domain::types::AttrValue;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

// ==========================================
// MatchingRule - 匹配规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// 属性路径（点号分隔，或派生属性名）
    pub attribute: String,

    pub constraint: Constraint,

    /// 必需规则失败 = 候选被排除
    #[serde(default)]
    pub required: bool,

    /// 权重（仅在缺省时取 1，显式 0 保留）
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl MatchingRule {
    pub fn new(attribute: &str, constraint: Constraint) -> Self {
        Self {
            id: None,
            attribute: attribute.to_string(),
            constraint,
            required: false,
            weight: default_weight(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

// ==========================================
// Constraint - 约束
// ==========================================
// JSON 形态: {"equals": "CT"} 或 {"equals": {"value": "CT"}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Constraint {
    Equals(#[serde(deserialize_with = "operand")] AttrValue),
    NotEquals(#[serde(deserialize_with = "operand")] AttrValue),
    Contains(#[serde(deserialize_with = "operand")] AttrValue),
    #[serde(rename = "containsI")]
    ContainsIgnoreCase(#[serde(deserialize_with = "operand")] AttrValue),
    DoesNotContain(#[serde(deserialize_with = "operand")] AttrValue),
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Regex(RegexPattern),
    GreaterThan(#[serde(deserialize_with = "numeric_operand")] f64),
    LessThan(#[serde(deserialize_with = "numeric_operand")] f64),
    #[serde(skip)]
    Predicate(Predicate),
}

impl Constraint {
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::Equals(_) => "equals",
            Constraint::NotEquals(_) => "notEquals",
            Constraint::Contains(_) => "contains",
            Constraint::ContainsIgnoreCase(_) => "containsI",
            Constraint::DoesNotContain(_) => "doesNotContain",
            Constraint::Range { .. } => "range",
            Constraint::Regex(_) => "regex",
            Constraint::GreaterThan(_) => "greaterThan",
            Constraint::LessThan(_) => "lessThan",
            Constraint::Predicate(_) => "predicate",
        }
    }

    pub fn equals(value: impl Into<AttrValue>) -> Self {
        Constraint::Equals(value.into())
    }

    pub fn not_equals(value: impl Into<AttrValue>) -> Self {
        Constraint::NotEquals(value.into())
    }

    pub fn contains(value: impl Into<AttrValue>) -> Self {
        Constraint::Contains(value.into())
    }

    pub fn contains_ignore_case(value: impl Into<AttrValue>) -> Self {
        Constraint::ContainsIgnoreCase(value.into())
    }

    pub fn does_not_contain(value: impl Into<AttrValue>) -> Self {
        Constraint::DoesNotContain(value.into())
    }

    pub fn range(min: f64, max: f64) -> Self {
        Constraint::Range {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn regex(pattern: &str) -> Self {
        Constraint::Regex(RegexPattern::new(pattern))
    }

    pub fn predicate<F>(name: &str, func: F) -> Self
    where
        F: Fn(&AttrValue) -> bool + Send + Sync + 'static,
    {
        Constraint::Predicate(Predicate::new(name, func))
    }
}

/// 接受裸值或 {"value": X} 包装形式
fn operand<'de, D>(deserializer: D) -> Result<AttrValue, D::Error>
where
    D: Deserializer<'de>,
{
    let value = AttrValue::deserialize(deserializer)?;
    Ok(unwrap_value(value))
}

fn numeric_operand<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = operand(deserializer)?;
    value
        .as_f64()
        .ok_or_else(|| serde::de::Error::custom(format!("约束操作数不是数值: {}", value)))
}

fn unwrap_value(value: AttrValue) -> AttrValue {
    match value {
        AttrValue::Map(mut map) if map.len() == 1 && map.contains_key("value") => {
            map.remove("value").unwrap_or(AttrValue::Null)
        }
        other => other,
    }
}

// ==========================================
// RegexPattern - 正则约束
// ==========================================
// 编译失败不在反序列化阶段报错，留给注册校验输出结构化错误
#[derive(Clone)]
pub struct RegexPattern {
    source: String,
    compiled: Option<Regex>,
}

impl RegexPattern {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            compiled: Regex::new(source).ok(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn compiled(&self) -> Option<&Regex> {
        self.compiled.as_ref()
    }

    /// 重新编译以获取具体错误信息
    pub fn compile_error(&self) -> Option<String> {
        match Regex::new(&self.source) {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        }
    }
}

impl fmt::Debug for RegexPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegexPattern({:?})", self.source)
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for RegexPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for RegexPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match operand(deserializer)? {
            AttrValue::Text(source) => Ok(RegexPattern::new(&source)),
            other => Err(serde::de::Error::custom(format!("正则约束必须是字符串: {}", other))),
        }
    }
}

// ==========================================
// Predicate - 程序化谓词
// ==========================================
#[derive(Clone)]
pub struct Predicate {
    pub name: String,
    func: Arc<dyn Fn(&AttrValue) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&AttrValue) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn test(&self, value: &AttrValue) -> bool {
        (self.func)(value)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.name)
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}
