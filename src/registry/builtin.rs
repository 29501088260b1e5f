// ==========================================
// 挂片协议引擎 - 内置默认协议
// ==========================================
// 单视口 1x1，无任何规则：无合格协议时回退使用
// ==========================================

use crate::domain::protocol::{Protocol, Stage, ViewportDefinition};

pub const DEFAULT_PROTOCOL_ID: &str = "default";

pub fn default_protocol() -> Protocol {
    let mut protocol = Protocol::new(DEFAULT_PROTOCOL_ID, "Default")
        .with_stage(Stage::grid("default-stage", 1, 1).with_viewport(ViewportDefinition::new()));
    protocol.description = Some("内置默认协议".to_string());
    protocol
}
