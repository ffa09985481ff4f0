//! `nestclaw config`: configuration management commands.

use std::path::Path;

use nestclaw_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            for line in summary(&config) {
                println!("   {line}");
            }
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_path();
    if init_at(&config_path)? {
        println!("✅ Created {}", config_path.display());
    } else {
        println!("  Config already exists: {}", config_path.display());
    }
    Ok(())
}

/// Write the default config to `path` unless a file is already there.
/// Returns whether a file was written.
fn init_at(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    tracing::debug!(path = %path.display(), "Wrote default config");
    Ok(true)
}

/// Settings that are valid but probably not what the user wants.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.subagents.max_iterations > config.agent.max_iterations {
        warnings.push(format!(
            "subagents.max_iterations ({}) exceeds agent.max_iterations ({})",
            config.subagents.max_iterations, config.agent.max_iterations
        ));
    }

    if config.subagents.history_limit.is_none() {
        warnings.push("subagents.history_limit is unset; completed sessions are kept forever".into());
    }

    warnings
}

fn summary(config: &AppConfig) -> Vec<String> {
    let history = config
        .subagents
        .history_limit
        .map_or_else(|| "unbounded".to_string(), |n| n.to_string());
    vec![
        format!("Model:       {}", config.default_model),
        format!(
            "Agent:       {} rounds, {:?} tools, streaming {}",
            config.agent.max_iterations, config.agent.tool_execution, config.agent.streaming
        ),
        format!(
            "Sub-agents:  {} concurrent, {} rounds, history {history}",
            config.subagents.max_concurrent, config.subagents.max_iterations
        ),
        format!("Logging:     {} (json: {})", config.logging.level, config.logging.json),
    ]
}
