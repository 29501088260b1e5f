// ==========================================
// 测试数据构建器 - 用于集成测试
// ==========================================

use hanging_protocol_engine::domain::metadata::tags;
use hanging_protocol_engine::domain::{
    Constraint, Instance, MatchingRule, Protocol, Series, Stage, Study, ViewportDefinition,
};
use hanging_protocol_engine::engine::{
    EngineOptions, LayoutInstruction, LayoutManager, ProtocolEngine, RecordingEventPublisher,
};
use hanging_protocol_engine::{InMemoryMetadataProvider, InMemoryProtocolRegistry};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// Series 构建器
// ==========================================

pub struct SeriesBuilder {
    uid: String,
    modality: Option<String>,
    number: Option<i32>,
    description: Option<String>,
    images: usize,
}

impl SeriesBuilder {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            modality: None,
            number: None,
            description: None,
            images: 0,
        }
    }

    pub fn modality(mut self, modality: &str) -> Self {
        self.modality = Some(modality.to_string());
        self
    }

    pub fn number(mut self, number: i32) -> Self {
        self.number = Some(number);
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// 追加 N 个图像实例（InstanceNumber 从 1 开始）
    pub fn images(mut self, count: usize) -> Self {
        self.images = count;
        self
    }

    pub fn build(self) -> Series {
        let mut series = Series::new(&self.uid);
        if let Some(modality) = &self.modality {
            series = series.with_attribute(tags::MODALITY, modality.as_str());
        }
        if let Some(number) = self.number {
            series = series.with_attribute(tags::SERIES_NUMBER, number);
        }
        if let Some(description) = &self.description {
            series = series.with_attribute(tags::SERIES_DESCRIPTION, description.as_str());
        }
        for i in 0..self.images {
            series = series.with_instance(
                Instance::new(&format!("{}.{}", self.uid, i + 1))
                    .with_attribute(tags::INSTANCE_NUMBER, (i + 1) as i64)
                    .with_attribute(tags::ROWS, 512i64),
            );
        }
        series
    }
}

// ==========================================
// Study 构建器
// ==========================================

pub struct StudyBuilder {
    study: Study,
}

impl StudyBuilder {
    pub fn new(uid: &str) -> Self {
        Self {
            study: Study::new(uid),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.study = self.study.with_attribute("StudyDescription", description);
        self
    }

    pub fn series(mut self, series: SeriesBuilder) -> Self {
        self.study = self.study.with_series(series.build());
        self
    }

    pub fn build(self) -> Study {
        self.study
    }
}

// ==========================================
// 常用测试场景
// ==========================================

/// CT 检查: AXIAL(SeriesNumber 2) + SCOUT(SeriesNumber 1)
pub fn ct_chest_study() -> Study {
    StudyBuilder::new("1.2.840.100")
        .description("CT CHEST")
        .series(
            SeriesBuilder::new("1.2.840.100.1")
                .modality("CT")
                .number(2)
                .description("AXIAL 5mm")
                .images(3),
        )
        .series(
            SeriesBuilder::new("1.2.840.100.2")
                .modality("CT")
                .number(1)
                .description("SCOUT")
                .images(1),
        )
        .build()
}

pub fn mr_brain_study() -> Study {
    StudyBuilder::new("1.2.840.200")
        .description("MR BRAIN")
        .series(SeriesBuilder::new("1.2.840.200.1").modality("MR").number(1).description("T1 AX"))
        .build()
}

/// 三个得分相同的 CT 序列 A/B/C（SeriesNumber 1/2/3）
pub fn tied_ct_study() -> Study {
    ["A", "B", "C"]
        .iter()
        .enumerate()
        .fold(StudyBuilder::new("1.2.840.300"), |study, (i, name)| {
            study.series(SeriesBuilder::new(&format!("1.2.840.300.{}", name)).modality("CT").number(i as i32 + 1).images(1))
        })
        .build()
}

/// 单视口绑定第二好的 CT 序列
pub fn second_ct_protocol() -> Protocol {
    Protocol::new("second-ct", "Second CT").with_stage(
        Stage::grid("second", 1, 1).with_viewport(
            ViewportDefinition::new()
                .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")).required())
                .with_matched_index(1),
        ),
    )
}

/// CT/AXIAL 单视口协议: Modality=CT 必需(权重5) + SeriesDescription 含 AXIAL(权重5)
pub fn ct_axial_protocol() -> Protocol {
    Protocol::new("ct-axial", "CT Axial").with_stage(
        Stage::grid("axial", 1, 1).with_viewport(
            ViewportDefinition::new()
                .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")).required().with_weight(5.0))
                .with_series_rule(
                    MatchingRule::new(tags::SERIES_DESCRIPTION, Constraint::contains("AXIAL")).with_weight(5.0),
                ),
        ),
    )
}

/// 仅匹配 MR 的协议（必需视口）
pub fn mr_only_protocol() -> Protocol {
    Protocol::new("mr-only", "MR Only").with_stage(
        Stage::grid("mr", 1, 1).with_viewport(
            ViewportDefinition::new()
                .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("MR")).required())
                .required(),
        ),
    )
}

/// 三阶段协议：中间阶段要求 MR（被禁用）
pub fn three_stage_protocol() -> Protocol {
    let ct_viewport = || {
        ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")).required())
    };
    Protocol::new("three-stage", "Three Stage")
        .with_stage(Stage::grid("first", 1, 1).with_viewport(ct_viewport()))
        .with_stage(
            Stage::grid("mr-compare", 1, 1)
                .with_viewport(
                    ViewportDefinition::new()
                        .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("MR")).required()),
                )
                .with_activation(1, 1),
        )
        .with_stage(Stage::grid("last", 1, 2).with_viewport(ct_viewport()).with_viewport(ct_viewport().with_matched_index(1)))
}

// ==========================================
// 记录型布局管理器
// ==========================================

#[derive(Default)]
pub struct RecordingLayoutManager {
    instructions: Mutex<Vec<LayoutInstruction>>,
}

impl RecordingLayoutManager {
    pub fn instructions(&self) -> Vec<LayoutInstruction> {
        self.instructions.lock().unwrap().clone()
    }
}

impl LayoutManager for RecordingLayoutManager {
    fn apply_layout(&self, instruction: &LayoutInstruction) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.instructions.lock().unwrap().push(instruction.clone());
        Ok(())
    }
}

// ==========================================
// 引擎装配
// ==========================================

pub struct TestEngine {
    pub engine: ProtocolEngine,
    pub events: Arc<RecordingEventPublisher>,
    pub layouts: Arc<RecordingLayoutManager>,
    pub provider: Arc<InMemoryMetadataProvider>,
}

pub fn build_engine(protocols: Vec<Protocol>, studies: Vec<Study>) -> TestEngine {
    build_engine_with_options(protocols, studies, EngineOptions::default())
}

pub fn build_engine_with_options(protocols: Vec<Protocol>, studies: Vec<Study>, options: EngineOptions) -> TestEngine {
    let registry = InMemoryProtocolRegistry::new();
    registry.register_all(protocols).expect("register protocols");

    let provider = Arc::new(InMemoryMetadataProvider::new(studies));
    let events = Arc::new(RecordingEventPublisher::new());
    let layouts = Arc::new(RecordingLayoutManager::default());

    let engine = ProtocolEngine::new(provider.clone(), Arc::new(registry))
        .with_publisher(events.clone())
        .with_layout_manager(layouts.clone())
        .with_options(options);

    TestEngine {
        engine,
        events,
        layouts,
        provider,
    }
}
