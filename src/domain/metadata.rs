// ==========================================
// 挂片协议引擎 - 检查/序列/实例元数据快照
// ==========================================
// 职责: 只读元数据实体，由外部元数据提供者构建
// 红线: 引擎从不修改这些实体
// ==========================================

use crate::domain::types::AttrValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type AttributeMap = BTreeMap<String, AttrValue>;

/// 常用 DICOM 关键字
pub mod tags {
    pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
    pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
    pub const SOP_INSTANCE_UID: &str = "SOPInstanceUID";
    pub const SERIES_NUMBER: &str = "SeriesNumber";
    pub const INSTANCE_NUMBER: &str = "InstanceNumber";
    pub const MODALITY: &str = "Modality";
    pub const SERIES_DESCRIPTION: &str = "SeriesDescription";
    pub const ROWS: &str = "Rows";
}

// ==========================================
// Instance - 实例
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl Instance {
    pub fn new(sop_instance_uid: &str) -> Self {
        Self::default().with_attribute(tags::SOP_INSTANCE_UID, sop_instance_uid)
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    pub fn sop_instance_uid(&self) -> Option<String> {
        text_attribute(&self.attributes, tags::SOP_INSTANCE_UID)
    }

    pub fn instance_number(&self) -> Option<f64> {
        self.attribute(tags::INSTANCE_NUMBER).and_then(AttrValue::as_f64)
    }

    /// 是否为可显示的图像实例（存在 Rows 属性）
    pub fn is_image(&self) -> bool {
        self.attribute(tags::ROWS).is_some()
    }
}

// ==========================================
// Series - 序列
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(default)]
    pub attributes: AttributeMap,

    #[serde(default)]
    pub instances: Vec<Instance>,

    /// 显示集 UID（缺省与 SeriesInstanceUID 相同）
    #[serde(default)]
    pub display_set_uid: Option<String>,
}

impl Series {
    pub fn new(series_instance_uid: &str) -> Self {
        Self::default().with_attribute(tags::SERIES_INSTANCE_UID, series_instance_uid)
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_display_set_uid(mut self, uid: &str) -> Self {
        self.display_set_uid = Some(uid.to_string());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    pub fn get_instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn first_instance(&self) -> Option<&Instance> {
        self.instances.first()
    }

    pub fn series_instance_uid(&self) -> Option<String> {
        text_attribute(&self.attributes, tags::SERIES_INSTANCE_UID)
            .or_else(|| self.first_instance().and_then(|i| text_attribute(&i.attributes, tags::SERIES_INSTANCE_UID)))
    }

    /// SeriesNumber，序列自身缺失时取首个实例
    pub fn series_number(&self) -> Option<f64> {
        self.attribute(tags::SERIES_NUMBER)
            .or_else(|| self.first_instance().and_then(|i| i.attribute(tags::SERIES_NUMBER)))
            .and_then(AttrValue::as_f64)
    }

    pub fn display_set_uid(&self) -> Option<String> {
        self.display_set_uid.clone().or_else(|| self.series_instance_uid())
    }
}

// ==========================================
// Study - 检查
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Study {
    #[serde(default)]
    pub attributes: AttributeMap,

    #[serde(default)]
    pub series: Vec<Series>,
}

impl Study {
    pub fn new(study_instance_uid: &str) -> Self {
        Self::default().with_attribute(tags::STUDY_INSTANCE_UID, study_instance_uid)
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_series(mut self, series: Series) -> Self {
        self.series.push(series);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    pub fn get_series(&self) -> &[Series] {
        &self.series
    }

    /// 首个序列的首个实例
    pub fn first_instance(&self) -> Option<&Instance> {
        self.series.iter().find_map(Series::first_instance)
    }

    pub fn study_instance_uid(&self) -> Option<String> {
        text_attribute(&self.attributes, tags::STUDY_INSTANCE_UID)
            .or_else(|| self.first_instance().and_then(|i| text_attribute(&i.attributes, tags::STUDY_INSTANCE_UID)))
    }

    pub fn instance_count(&self) -> usize {
        self.series.iter().map(|s| s.instances.len()).sum()
    }
}

fn text_attribute(map: &AttributeMap, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_text()).map(|s| s.into_owned())
}

// ==========================================
// DisplaySetRef - 显示集引用
// ==========================================
// 绑定到视口的可渲染图像集合（通常是一个序列）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySetRef {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub display_set_uid: String,

    /// 实例级规则选中的图像
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sop_instance_uid: Option<String>,

    /// 图像在序列中的下标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_index: Option<usize>,
}

impl DisplaySetRef {
    /// 从检查+序列构建（UID 缺失时使用位置占位，保证引用可区分）
    pub fn for_series(study: &Study, study_index: usize, series: &Series, series_index: usize) -> Self {
        let study_instance_uid = study
            .study_instance_uid()
            .unwrap_or_else(|| format!("study-{}", study_index));
        let series_instance_uid = series
            .series_instance_uid()
            .unwrap_or_else(|| format!("{}/series-{}", study_instance_uid, series_index));
        let display_set_uid = series
            .display_set_uid()
            .unwrap_or_else(|| series_instance_uid.clone());

        Self {
            study_instance_uid,
            series_instance_uid,
            display_set_uid,
            sop_instance_uid: None,
            instance_index: None,
        }
    }

    pub fn with_instance(mut self, instance: &Instance, instance_index: usize) -> Self {
        self.sop_instance_uid = instance.sop_instance_uid();
        self.instance_index = Some(instance_index);
        self
    }
}
