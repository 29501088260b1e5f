// ==========================================
// 挂片协议引擎 - 协议引擎（状态机）
// ==========================================
// 状态: Uninitialized → Idle → Matching → Applied
// 职责: 编排重算、持有当前协议与阶段、提供阶段导航与手动选择
// 红线: 当前协议/阶段以完整构建好的值一次性替换
// 红线: 重算失败保留上一次成功的状态
// ==========================================

use crate::config::EngineConfigReader;
use crate::domain::match_result::MatchResult;
use crate::domain::metadata::Study;
use crate::domain::protocol::Protocol;
use crate::domain::types::{EngineState, StageStatus};
use crate::engine::attribute_resolver::AttributeResolver;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{MatchRun, OptionalEventPublisher, ProtocolEvent, ProtocolEventPublisher};
use crate::engine::layout_binder::{LayoutBinder, LayoutManager, NoOpLayoutManager, ViewportBinding};
use crate::engine::matcher::{MatchOptions, ProtocolMatcher};
use crate::metadata::MetadataProvider;
use crate::registry::ProtocolRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ==========================================
// EngineOptions - 引擎选项
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// 回退协议 id（None = 注册表默认协议）
    pub default_protocol_id: Option<String>,
    pub prefer_displayed_series: bool,
    pub skip_non_image_instances: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_protocol_id: None,
            prefer_displayed_series: true,
            skip_non_image_instances: true,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &dyn EngineConfigReader) -> EngineResult<Self> {
        Ok(Self {
            default_protocol_id: config.get_default_protocol_id()?,
            prefer_displayed_series: config.get_prefer_displayed_series()?,
            skip_non_image_instances: config.get_skip_non_image_instances()?,
        })
    }
}

// ==========================================
// ActiveProtocol - 当前应用的协议
// ==========================================
#[derive(Debug, Clone)]
pub struct ActiveProtocol {
    pub protocol: Arc<Protocol>,
    pub stage_index: usize,
    pub match_result: MatchResult,
    pub bindings: Vec<ViewportBinding>,
    /// 无合格协议时的默认协议回退
    pub fallback: bool,
    /// 通过 set_protocol 手动选择
    pub forced: bool,
}

impl ActiveProtocol {
    fn build(protocol: Arc<Protocol>, match_result: MatchResult, stage_index: usize, fallback: bool, forced: bool) -> Self {
        let bindings = match (protocol.stage(stage_index), match_result.stage(stage_index)) {
            (Some(stage), Some(stage_match)) => LayoutBinder::bind(stage, stage_match),
            _ => Vec::new(),
        };
        Self {
            protocol,
            stage_index,
            match_result,
            bindings,
            fallback,
            forced,
        }
    }

    fn at_stage(&self, stage_index: usize) -> Self {
        Self::build(
            self.protocol.clone(),
            self.match_result.clone(),
            stage_index,
            self.fallback,
            self.forced,
        )
    }

    pub fn protocol_id(&self) -> &str {
        &self.protocol.id
    }

    pub fn stage_count(&self) -> usize {
        self.protocol.stages.len()
    }

    pub fn stage_status(&self, stage_index: usize) -> Option<StageStatus> {
        self.match_result.stage(stage_index).map(|s| s.status)
    }
}

/// 一次重算的完整产物（提交前不触碰引擎状态）
struct Evaluation {
    run: MatchRun,
    studies: Vec<Study>,
    results: Vec<MatchResult>,
    active: ActiveProtocol,
    state: EngineState,
}

// ==========================================
// ProtocolEngine - 协议引擎
// ==========================================
pub struct ProtocolEngine {
    provider: Arc<dyn MetadataProvider>,
    registry: Arc<dyn ProtocolRegistry>,
    matcher: ProtocolMatcher,
    publisher: OptionalEventPublisher,
    layout_manager: Arc<dyn LayoutManager>,
    options: EngineOptions,
    /// 布局中正在显示的序列（由调用方提供，不取自引擎自身绑定）
    displayed_series: BTreeSet<String>,

    state: EngineState,
    matched: Vec<MatchResult>,
    active: Option<ActiveProtocol>,
    studies: Vec<Study>,
    last_run: Option<MatchRun>,
    last_generation: Option<u64>,
}

impl ProtocolEngine {
    /// 创建引擎（完成 Uninitialized → Idle，尚未匹配）
    ///
    /// # 参数
    /// - provider: 元数据提供者
    /// - registry: 协议注册表
    pub fn new(provider: Arc<dyn MetadataProvider>, registry: Arc<dyn ProtocolRegistry>) -> Self {
        Self {
            provider,
            registry,
            matcher: ProtocolMatcher::default(),
            publisher: OptionalEventPublisher::none(),
            layout_manager: Arc::new(NoOpLayoutManager),
            options: EngineOptions::default(),
            displayed_series: BTreeSet::new(),
            state: EngineState::Idle,
            matched: Vec::new(),
            active: None,
            studies: Vec::new(),
            last_run: None,
            last_generation: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ProtocolEventPublisher>) -> Self {
        self.publisher = OptionalEventPublisher::with_publisher(publisher);
        self
    }

    pub fn with_layout_manager(mut self, layout_manager: Arc<dyn LayoutManager>) -> Self {
        self.layout_manager = layout_manager;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<AttributeResolver>) -> Self {
        self.matcher = ProtocolMatcher::new(resolver);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(self, config: &dyn EngineConfigReader) -> EngineResult<Self> {
        let options = EngineOptions::from_config(config)?;
        Ok(self.with_options(options))
    }

    // ==========================================
    // 状态查询
    // ==========================================

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// 最近一次匹配的排序结果
    pub fn matched_protocols(&self) -> &[MatchResult] {
        &self.matched
    }

    pub fn active(&self) -> Option<&ActiveProtocol> {
        self.active.as_ref()
    }

    pub fn current_bindings(&self) -> &[ViewportBinding] {
        self.active.as_ref().map(|a| a.bindings.as_slice()).unwrap_or(&[])
    }

    pub fn last_run(&self) -> Option<&MatchRun> {
        self.last_run.as_ref()
    }

    pub fn last_generation(&self) -> Option<u64> {
        self.last_generation
    }

    pub fn displayed_series(&self) -> &BTreeSet<String> {
        &self.displayed_series
    }

    /// 设置布局中正在显示的序列，供下一次重算的平分裁决使用
    ///
    /// # 参数
    /// - uids: 显示集 uid 或 SeriesInstanceUID；整体替换上一次的集合
    pub fn set_displayed_series<I, S>(&mut self, uids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.displayed_series = uids.into_iter().map(Into::into).collect();
        debug!(count = self.displayed_series.len(), "已更新显示中的序列");
    }

    // ==========================================
    // 重算
    // ==========================================

    /// 显式触发重算
    pub fn run_match(&mut self) -> EngineResult<EngineState> {
        self.run_match_generation(None)
    }

    /// 按元数据版本触发重算
    ///
    /// # 参数
    /// - generation: 触发本次重算的元数据版本；早于已应用版本的请求直接丢弃
    ///
    /// # 返回
    /// - Ok(state): 重算后的引擎状态
    /// - Err: 元数据/注册表失败，引擎保持上一次成功的状态
    #[instrument(skip(self))]
    pub fn run_match_generation(&mut self, generation: Option<u64>) -> EngineResult<EngineState> {
        if let (Some(requested), Some(applied)) = (generation, self.last_generation) {
            if requested < applied {
                debug!(requested, applied, "丢弃过期的重算请求");
                return Ok(self.state);
            }
        }

        let previous_state = self.state;
        self.state = EngineState::Matching;

        let evaluation = match self.evaluate(generation) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                self.state = previous_state;
                warn!(error = %e, "重算失败，保留上一次状态");
                return Err(e);
            }
        };

        let Evaluation {
            run,
            studies,
            results,
            active,
            state,
        } = evaluation;

        let applied_event = ProtocolEvent::ProtocolApplied {
            protocol_id: active.protocol.id.clone(),
            stage_index: active.stage_index,
            fallback: active.fallback,
        };
        let matched_event = ProtocolEvent::ProtocolMatched {
            run: run.clone(),
            results: results.clone(),
        };

        self.studies = studies;
        self.matched = results;
        self.active = Some(active);
        self.last_run = Some(run);
        if generation.is_some() {
            self.last_generation = generation.max(self.last_generation);
        }
        self.state = state;

        self.publish(matched_event);
        self.publish(applied_event);
        self.apply_layout();

        Ok(self.state)
    }

    fn evaluate(&self, generation: Option<u64>) -> EngineResult<Evaluation> {
        let run = MatchRun::start(generation);
        let studies = self.provider.get_studies()?;
        let protocols = self.registry.get_all()?;
        let options = self.match_options();

        let results = self.matcher.match_protocols(&protocols, &studies, &options);

        if let Some(best) = results.first() {
            let protocol = protocols
                .get(best.registration_index)
                .cloned()
                .ok_or_else(|| EngineError::UnknownProtocol(best.protocol_id.clone()))?;
            info!(
                run_id = %run.run_id,
                protocol_id = %best.protocol_id,
                score = best.score,
                candidates = results.len(),
                "协议已选定"
            );
            let active = ActiveProtocol::build(protocol, best.clone(), 0, false, false);
            return Ok(Evaluation {
                run,
                studies,
                results,
                active,
                state: EngineState::Applied,
            });
        }

        let default = self.resolve_default()?;
        warn!(
            run_id = %run.run_id,
            protocols = protocols.len(),
            studies = studies.len(),
            default_protocol = %default.id,
            "无合格协议，回退默认协议"
        );
        let result = self
            .matcher
            .evaluate_protocol(&default, protocols.len(), &studies, &options);
        let active = ActiveProtocol::build(default, result, 0, true, false);

        Ok(Evaluation {
            run,
            studies,
            results,
            active,
            state: EngineState::Idle,
        })
    }

    fn resolve_default(&self) -> EngineResult<Arc<Protocol>> {
        if let Some(id) = &self.options.default_protocol_id {
            match self.registry.get(id)? {
                Some(protocol) => return Ok(protocol),
                None => warn!(default_protocol_id = %id, "配置的默认协议不存在，使用注册表默认协议"),
            }
        }
        Ok(self.registry.get_default()?)
    }

    fn match_options(&self) -> MatchOptions {
        MatchOptions {
            displayed_series: self.displayed_series.clone(),
            prefer_displayed_series: self.options.prefer_displayed_series,
            skip_non_image_instances: self.options.skip_non_image_instances,
        }
    }

    // ==========================================
    // 手动选择
    // ==========================================

    /// 强制应用指定协议并回到阶段 0
    ///
    /// # 返回
    /// - Ok(true): 已切换协议，或当前协议回到了阶段 0
    /// - Ok(false): 该协议已是当前协议且位于阶段 0（无事件）
    /// - Err(UnknownProtocol): 协议不存在
    #[instrument(skip(self))]
    pub fn set_protocol(&mut self, protocol_id: &str) -> EngineResult<bool> {
        if let Some(active) = self.active.as_ref().filter(|a| a.protocol.id == protocol_id) {
            if active.stage_index == 0 {
                debug!("协议已是当前协议，忽略");
                return Ok(false);
            }
            return self.switch_stage(0);
        }

        let protocol = self
            .registry
            .get(protocol_id)?
            .ok_or_else(|| EngineError::UnknownProtocol(protocol_id.to_string()))?;

        let match_result = match self.matched.iter().find(|r| r.protocol_id == protocol_id) {
            Some(result) => result.clone(),
            None => {
                let registration_index = self
                    .registry
                    .get_all()?
                    .iter()
                    .position(|p| p.id == protocol_id)
                    .unwrap_or(usize::MAX);
                self.matcher
                    .evaluate_protocol(&protocol, registration_index, &self.studies, &self.match_options())
            }
        };

        let active = ActiveProtocol::build(protocol, match_result, 0, false, true);
        info!(protocol_id, "手动应用协议");
        self.publish(ProtocolEvent::ProtocolApplied {
            protocol_id: active.protocol.id.clone(),
            stage_index: 0,
            fallback: false,
        });
        self.active = Some(active);
        self.state = EngineState::Applied;
        self.apply_layout();
        Ok(true)
    }

    // ==========================================
    // 阶段导航
    // ==========================================

    /// 下一个可用阶段（跳过 Disabled）
    pub fn next_stage(&mut self) -> EngineResult<bool> {
        let active = self.active.as_ref().ok_or(EngineError::NoActiveProtocol)?;
        match find_stage(active, (active.stage_index + 1)..active.stage_count()) {
            Some(index) => self.switch_stage(index),
            None => Ok(false),
        }
    }

    /// 上一个可用阶段（跳过 Disabled）
    pub fn previous_stage(&mut self) -> EngineResult<bool> {
        let active = self.active.as_ref().ok_or(EngineError::NoActiveProtocol)?;
        match find_stage(active, (0..active.stage_index).rev()) {
            Some(index) => self.switch_stage(index),
            None => Ok(false),
        }
    }

    pub fn is_next_stage_available(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| find_stage(a, (a.stage_index + 1)..a.stage_count()).is_some())
    }

    pub fn is_previous_stage_available(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| find_stage(a, (0..a.stage_index).rev()).is_some())
    }

    /// 直接跳转到指定阶段
    pub fn set_stage(&mut self, stage_index: usize) -> EngineResult<bool> {
        let active = self.active.as_ref().ok_or(EngineError::NoActiveProtocol)?;
        if stage_index >= active.stage_count() {
            return Err(EngineError::StageOutOfRange {
                protocol_id: active.protocol.id.clone(),
                stage_index,
                stage_count: active.stage_count(),
            });
        }
        if active.stage_status(stage_index) == Some(StageStatus::Disabled) {
            return Err(EngineError::StageDisabled {
                protocol_id: active.protocol.id.clone(),
                stage_index,
            });
        }
        if stage_index == active.stage_index {
            return Ok(false);
        }
        self.switch_stage(stage_index)
    }

    fn switch_stage(&mut self, stage_index: usize) -> EngineResult<bool> {
        let active = self.active.as_ref().ok_or(EngineError::NoActiveProtocol)?;
        let next = active.at_stage(stage_index);
        debug!(protocol_id = %next.protocol.id, from = active.stage_index, to = stage_index, "阶段切换");

        let event = ProtocolEvent::StageChanged {
            protocol_id: next.protocol.id.clone(),
            stage_index,
        };
        self.active = Some(next);
        self.publish(event);
        self.apply_layout();
        Ok(true)
    }

    // ==========================================
    // 输出
    // ==========================================

    fn publish(&self, event: ProtocolEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.publisher.publish(event) {
            warn!(event_type = event_type.as_str(), error = %e, "事件发布失败");
        }
    }

    fn apply_layout(&self) {
        let Some(active) = &self.active else {
            return;
        };
        let (Some(stage), Some(stage_match)) = (
            active.protocol.stage(active.stage_index),
            active.match_result.stage(active.stage_index),
        ) else {
            return;
        };

        let instruction = LayoutBinder::instruction(&active.protocol.id, stage, stage_match);
        if let Err(e) = self.layout_manager.apply_layout(&instruction) {
            warn!(protocol_id = %active.protocol.id, stage_id = %stage.id, error = %e, "布局应用失败");
        }
    }
}

/// 在候选下标中找第一个非 Disabled 阶段
fn find_stage(active: &ActiveProtocol, mut candidates: impl Iterator<Item = usize>) -> Option<usize> {
    candidates.find(|&index| active.stage_status(index) != Some(StageStatus::Disabled))
}
