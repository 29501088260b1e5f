// ==========================================
// 挂片协议引擎 - 属性解析器
// ==========================================
// 职责: 按 (层级, 属性路径, 上下文) 解析属性值
// 顺序: 派生属性 → 实体自身属性（点号路径）→ 首个实例回退
// 红线: 未知路径返回 None，派生属性失败/崩溃不向外传播
// ==========================================

use crate::domain::metadata::{Instance, Series, Study};
use crate::domain::types::{AttrValue, EntityLevel};
use crate::domain::AttributeMap;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

// ==========================================
// ResolveContext - 解析上下文
// ==========================================
// 显式传入所有已加载检查，派生属性不依赖任何全局状态
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// 全部已加载检查（按提供顺序，下标 0 为当前检查）
    pub studies: &'a [Study],
    pub study_index: usize,
    pub study: &'a Study,
    pub series: Option<&'a Series>,
    pub instance: Option<&'a Instance>,
}

impl<'a> ResolveContext<'a> {
    pub fn for_study(studies: &'a [Study], study_index: usize, study: &'a Study) -> Self {
        Self {
            studies,
            study_index,
            study,
            series: None,
            instance: None,
        }
    }

    pub fn with_series(self, series: &'a Series) -> Self {
        Self {
            series: Some(series),
            instance: None,
            ..self
        }
    }

    pub fn with_instance(self, instance: &'a Instance) -> Self {
        Self {
            instance: Some(instance),
            ..self
        }
    }
}

// ==========================================
// 派生属性
// ==========================================
pub type DerivedFn =
    dyn Fn(EntityLevel, &ResolveContext<'_>) -> anyhow::Result<Option<AttrValue>> + Send + Sync;

#[derive(Clone)]
pub struct DerivedAttribute {
    pub id: String,
    pub name: String,
    func: Arc<DerivedFn>,
}

impl DerivedAttribute {
    pub fn new<F>(id: &str, name: &str, func: F) -> Self
    where
        F: Fn(EntityLevel, &ResolveContext<'_>) -> anyhow::Result<Option<AttrValue>> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for DerivedAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAttribute")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// 派生属性计算错误
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("派生属性计算失败: {id}: {message}")]
    Derived { id: String, message: String },

    #[error("派生属性计算崩溃: {id}")]
    Panicked { id: String },
}

// ==========================================
// AttributeResolver
// ==========================================
#[derive(Debug, Clone)]
pub struct AttributeResolver {
    derived: BTreeMap<String, DerivedAttribute>,
}

impl Default for AttributeResolver {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AttributeResolver {
    /// 不含任何派生属性的解析器
    pub fn new() -> Self {
        Self {
            derived: BTreeMap::new(),
        }
    }

    /// 带内置派生属性的解析器
    pub fn with_builtins() -> Self {
        let mut resolver = Self::new();
        for attribute in builtin_attributes() {
            resolver.register(attribute);
        }
        resolver
    }

    /// 注册派生属性（同名覆盖）
    pub fn register(&mut self, attribute: DerivedAttribute) {
        if self.derived.contains_key(&attribute.id) {
            tracing::debug!(id = %attribute.id, "覆盖已注册的派生属性");
        }
        self.derived.insert(attribute.id.clone(), attribute);
    }

    pub fn has_derived(&self, id: &str) -> bool {
        self.derived.contains_key(id)
    }

    /// 解析属性值（失败视为缺失）
    pub fn resolve(&self, level: EntityLevel, path: &str, ctx: &ResolveContext<'_>) -> Option<AttrValue> {
        match self.try_resolve(level, path, ctx) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(level = %level, path, error = %e, "属性解析失败，按缺失处理");
                None
            }
        }
    }

    /// 解析属性值（保留派生属性的错误）
    ///
    /// # 返回
    /// - Ok(Some(value)): 找到非 null 值
    /// - Ok(None): 属性不存在
    /// - Err: 派生属性返回错误或崩溃
    pub fn try_resolve(
        &self,
        level: EntityLevel,
        path: &str,
        ctx: &ResolveContext<'_>,
    ) -> Result<Option<AttrValue>, ResolveError> {
        if let Some(attribute) = self.derived.get(path) {
            let outcome = catch_unwind(AssertUnwindSafe(|| (attribute.func)(level, ctx)));
            return match outcome {
                Ok(Ok(value)) => Ok(value.filter(|v| !v.is_null())),
                Ok(Err(e)) => Err(ResolveError::Derived {
                    id: attribute.id.clone(),
                    message: format!("{:#}", e),
                }),
                Err(_) => Err(ResolveError::Panicked {
                    id: attribute.id.clone(),
                }),
            };
        }

        Ok(resolve_own(level, path, ctx))
    }
}

fn resolve_own(level: EntityLevel, path: &str, ctx: &ResolveContext<'_>) -> Option<AttrValue> {
    match level {
        EntityLevel::Protocol | EntityLevel::Study => lookup(&ctx.study.attributes, path).or_else(|| {
            ctx.study
                .first_instance()
                .and_then(|i| lookup(&i.attributes, path))
        }),
        EntityLevel::Series => {
            let series = ctx.series?;
            lookup(&series.attributes, path)
                .or_else(|| series.first_instance().and_then(|i| lookup(&i.attributes, path)))
        }
        EntityLevel::Instance => lookup(&ctx.instance?.attributes, path),
    }
}

/// 在属性表中按路径查找（先精确匹配键，再按点号逐段下探）
fn lookup(map: &AttributeMap, path: &str) -> Option<AttrValue> {
    if let Some(value) = map.get(path) {
        return Some(value.clone()).filter(|v| !v.is_null());
    }

    let mut segments = path.split('.');
    let head = segments.next()?;
    let mut current = map.get(head)?;
    let mut descended = false;
    for segment in segments {
        current = current.get_segment(segment)?;
        descended = true;
    }

    if !descended || current.is_null() {
        return None;
    }
    Some(current.clone())
}

// ==========================================
// 内置派生属性
// ==========================================
pub mod builtin_ids {
    pub const NUMBER_OF_SERIES_RELATED_INSTANCES: &str = "numberOfSeriesRelatedInstances";
    pub const NUMBER_OF_STUDY_RELATED_SERIES: &str = "numberOfStudyRelatedSeries";
    pub const NUMBER_OF_STUDY_RELATED_INSTANCES: &str = "numberOfStudyRelatedInstances";
    pub const NUMBER_OF_PRIORS_REFERENCED: &str = "numberOfPriorsReferenced";
    pub const STUDY_INDEX: &str = "studyIndex";
    pub const IS_ACTIVE_STUDY: &str = "isActiveStudy";
}

fn builtin_attributes() -> Vec<DerivedAttribute> {
    use builtin_ids::*;

    vec![
        DerivedAttribute::new(NUMBER_OF_SERIES_RELATED_INSTANCES, "序列实例数", |_, ctx| {
            Ok(ctx.series.map(|s| AttrValue::from(s.instances.len())))
        }),
        DerivedAttribute::new(NUMBER_OF_STUDY_RELATED_SERIES, "检查序列数", |_, ctx| {
            Ok(Some(AttrValue::from(ctx.study.series.len())))
        }),
        DerivedAttribute::new(NUMBER_OF_STUDY_RELATED_INSTANCES, "检查实例数", |_, ctx| {
            Ok(Some(AttrValue::from(ctx.study.instance_count())))
        }),
        DerivedAttribute::new(NUMBER_OF_PRIORS_REFERENCED, "已加载历史检查数", |_, ctx| {
            Ok(Some(AttrValue::from(ctx.studies.len().saturating_sub(1))))
        }),
        DerivedAttribute::new(STUDY_INDEX, "检查序号", |_, ctx| {
            Ok(Some(AttrValue::from(ctx.study_index)))
        }),
        DerivedAttribute::new(IS_ACTIVE_STUDY, "是否当前检查", |_, ctx| {
            Ok(Some(AttrValue::from(ctx.study_index == 0)))
        }),
    ]
}
