use anyhow::Result;
use serde::Serialize;

use deneb_core::config::IntegrationConfig;
use deneb_core::file::FrameItem;

#[derive(Serialize)]
struct RunFileTemplate {
    output: &'static str,
    frames: Vec<FrameItem>,
    integration: IntegrationConfig,
}

/// Print a full default run file as TOML to stdout.
pub fn run() -> Result<()> {
    let template = RunFileTemplate {
        output: "integration.dfc",
        frames: vec![
            FrameItem::new("light_001.dfc"),
            FrameItem::new("light_002.dfc"),
            FrameItem::new("light_003.dfc"),
        ],
        integration: IntegrationConfig::default(),
    };
    let toml_str = toml::to_string_pretty(&template)?;
    print!("{toml_str}");
    Ok(())
}
