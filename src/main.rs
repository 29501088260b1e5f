// ==========================================
// 挂片协议引擎 - 命令行入口
// ==========================================
// 用法: hp-match <protocols.json|协议目录> <studies.json>
// 输出: 排序后的匹配结果与当前阶段视口绑定（JSON，stdout）
// ==========================================

use anyhow::{bail, Context};
use hanging_protocol_engine::config::{ConfigManager, EngineConfigReader};
use hanging_protocol_engine::{logging, InMemoryMetadataProvider, InMemoryProtocolRegistry, ProtocolEngine};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        bail!("用法: {} <protocols.json|协议目录> <studies.json>", args[0]);
    }

    let config = ConfigManager::load_default().context("配置加载失败")?;
    logging::init_with_format(config.get_log_format()?);

    tracing::info!("==================================================");
    tracing::info!("{} v{}", hanging_protocol_engine::APP_NAME, hanging_protocol_engine::VERSION);
    tracing::info!("==================================================");

    let registry = InMemoryProtocolRegistry::new();
    let protocol_path = Path::new(&args[1]);
    let loaded = if protocol_path.is_dir() {
        registry.load_dir(protocol_path)
    } else {
        registry.load_file(protocol_path)
    }
    .with_context(|| format!("协议加载失败: {}", protocol_path.display()))?;
    tracing::info!(count = loaded, "协议已加载");

    let provider = InMemoryMetadataProvider::from_json_file(&args[2])
        .with_context(|| format!("元数据加载失败: {}", args[2]))?;

    let mut engine = ProtocolEngine::new(Arc::new(provider), Arc::new(registry)).with_config(&config)?;
    let state = engine.run_match()?;

    let active = engine.active().map(|a| {
        json!({
            "protocolId": a.protocol_id(),
            "stageIndex": a.stage_index,
            "fallback": a.fallback,
            "bindings": a.bindings,
        })
    });
    let output = json!({
        "state": state,
        "matched": engine.matched_protocols(),
        "active": active,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
