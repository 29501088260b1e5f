// ==========================================
// 挂片协议引擎 - 协议/阶段/视口定义
// ==========================================
// 职责: 挂片协议的静态结构（JSON 可直接加载）
// 约束: 每个阶段的视口数量 = 布局槽位数量（注册时校验）
// ==========================================

use crate::domain::rule::MatchingRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// Protocol - 挂片协议
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub id: String,

    /// 显示名称（缺省时使用 id）
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 协议级规则（针对每个检查评估）
    #[serde(default)]
    pub protocol_matching_rules: Vec<MatchingRule>,

    /// 需要的历史检查数量（-1 = 仅当前检查提供候选，0 = 无要求）
    #[serde(default)]
    pub number_of_priors_referenced: i32,

    #[serde(default)]
    pub locked: bool,

    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Protocol {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            protocol_matching_rules: Vec::new(),
            number_of_priors_referenced: 0,
            locked: false,
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_protocol_rule(mut self, rule: MatchingRule) -> Self {
        self.protocol_matching_rules.push(rule);
        self
    }

    pub fn with_priors(mut self, number_of_priors_referenced: i32) -> Self {
        self.number_of_priors_referenced = number_of_priors_referenced;
        self
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// 仅当前（首个）检查提供候选
    pub fn active_study_only(&self) -> bool {
        self.number_of_priors_referenced < 0
    }

    /// 需要加载的最少历史检查数量
    pub fn required_priors(&self) -> usize {
        self.number_of_priors_referenced.max(0) as usize
    }
}

// ==========================================
// Stage - 阶段
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub viewport_structure: ViewportStructure,

    #[serde(default)]
    pub viewports: Vec<ViewportDefinition>,

    #[serde(default)]
    pub activation: StageActivation,
}

impl Stage {
    pub fn new(id: &str, structure: ViewportStructure) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            viewport_structure: structure,
            viewports: Vec::new(),
            activation: StageActivation::default(),
        }
    }

    pub fn grid(id: &str, rows: u32, columns: u32) -> Self {
        Self::new(id, ViewportStructure::Grid { rows, columns })
    }

    pub fn with_viewport(mut self, viewport: ViewportDefinition) -> Self {
        self.viewports.push(viewport);
        self
    }

    pub fn with_activation(mut self, enabled_min_viewports: usize, passive_min_viewports: usize) -> Self {
        self.activation = StageActivation {
            enabled_min_viewports,
            passive_min_viewports,
        };
        self
    }

    /// 视口的布局位置（显式位置优先，否则按行优先顺序推导）
    pub fn position_of(&self, index: usize) -> ViewportPosition {
        self.viewports
            .get(index)
            .and_then(|v| v.position)
            .unwrap_or_else(|| self.viewport_structure.default_position(index))
    }
}

/// 阶段激活阈值：已填充视口数 ≥ enabled → Enabled；≥ passive → Passive；否则 Disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageActivation {
    #[serde(default = "default_enabled_min")]
    pub enabled_min_viewports: usize,

    #[serde(default)]
    pub passive_min_viewports: usize,
}

fn default_enabled_min() -> usize {
    1
}

impl Default for StageActivation {
    fn default() -> Self {
        Self {
            enabled_min_viewports: default_enabled_min(),
            passive_min_viewports: 0,
        }
    }
}

// ==========================================
// ViewportStructure - 布局结构
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layoutType", rename_all = "camelCase")]
pub enum ViewportStructure {
    Grid { rows: u32, columns: u32 },
    Custom { layout: Vec<LayoutRegion> },
}

impl ViewportStructure {
    pub fn slot_count(&self) -> usize {
        match self {
            ViewportStructure::Grid { rows, columns } => (*rows as usize) * (*columns as usize),
            ViewportStructure::Custom { layout } => layout.len(),
        }
    }

    pub fn default_position(&self, index: usize) -> ViewportPosition {
        match self {
            ViewportStructure::Grid { columns, .. } if *columns > 0 => ViewportPosition {
                row: (index / *columns as usize) as u32,
                column: (index % *columns as usize) as u32,
            },
            _ => ViewportPosition {
                row: 0,
                column: index as u32,
            },
        }
    }

    /// 位置是否落在布局内
    pub fn contains(&self, position: ViewportPosition) -> bool {
        match self {
            ViewportStructure::Grid { rows, columns } => position.row < *rows && position.column < *columns,
            ViewportStructure::Custom { layout } => {
                position.row == 0 && (position.column as usize) < layout.len()
            }
        }
    }
}

/// 自定义布局区域（相对坐标 0..1）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewportPosition {
    pub row: u32,
    pub column: u32,
}

// ==========================================
// ViewportDefinition - 视口定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<ViewportPosition>,

    #[serde(default)]
    pub study_rules: Vec<MatchingRule>,

    #[serde(default)]
    pub series_rules: Vec<MatchingRule>,

    #[serde(default)]
    pub instance_rules: Vec<MatchingRule>,

    /// 必需视口：无候选时整个协议被排除
    #[serde(default)]
    pub required: bool,

    /// 绑定第 N 个最佳候选（0 = 最佳）
    #[serde(default)]
    pub matched_index: usize,

    #[serde(default)]
    pub settings: ViewportSettings,
}

impl ViewportDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, row: u32, column: u32) -> Self {
        self.position = Some(ViewportPosition { row, column });
        self
    }

    pub fn with_study_rule(mut self, rule: MatchingRule) -> Self {
        self.study_rules.push(rule);
        self
    }

    pub fn with_series_rule(mut self, rule: MatchingRule) -> Self {
        self.series_rules.push(rule);
        self
    }

    pub fn with_instance_rule(mut self, rule: MatchingRule) -> Self {
        self.instance_rules.push(rule);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_matched_index(mut self, matched_index: usize) -> Self {
        self.matched_index = matched_index;
        self
    }

    pub fn with_settings(mut self, settings: ViewportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn all_rules(&self) -> impl Iterator<Item = &MatchingRule> {
        self.study_rules
            .iter()
            .chain(self.series_rules.iter())
            .chain(self.instance_rules.iter())
    }
}

// ==========================================
// ViewportSettings - 视口显示设置
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_level: Option<WindowLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wl_preset: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowLevel {
    pub window_width: f64,
    pub window_center: f64,
}
