use anyhow::Context;
use sensora_device::Settings;
use std::path::{Path, PathBuf};

/// `$SENSORA_HOME`, or `~/.sensora`, created if needed
pub fn sensora_home() -> anyhow::Result<PathBuf> {
    let home = match std::env::var("SENSORA_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs::home_dir()
            .context("could not determine home directory")?
            .join(".sensora"),
    };
    std::fs::create_dir_all(&home).with_context(|| format!("failed to create {}", home.display()))?;
    Ok(home)
}

/// Read `config.json`, writing the defaults on first run
pub fn load_settings(home: &Path) -> anyhow::Result<Settings> {
    let path = home.join("config.json");
    if path.exists() {
        let data = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        return serde_json::from_str(&data).with_context(|| format!("invalid config in {}", path.display()));
    }

    let settings = Settings::default();
    std::fs::write(&path, serde_json::to_string_pretty(&settings)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("wrote default config to {}", path.display());
    Ok(settings)
}
