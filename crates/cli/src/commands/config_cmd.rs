//! `stepwise config`: configuration inspection.

use stepwise_config::AppConfig;

use crate::ConfigAction;

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Show => show(),
        ConfigAction::Path => path(),
        ConfigAction::Init => init(),
    }
}

fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let mut table = toml::Value::try_from(&config)?;

    // Never echo secrets
    if let Some(providers) = table.get_mut("providers").and_then(|p| p.as_table_mut()) {
        for (_, provider) in providers.iter_mut() {
            if let Some(key) = provider.get_mut("api_key") {
                *key = toml::Value::String("***".into());
            }
        }
    }

    println!("{}", toml::to_string_pretty(&table)?);
    Ok(())
}

fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}

fn init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() {
        eprintln!("Config already exists at {}", path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, AppConfig::default_toml())?;
    eprintln!("Wrote default config to {}", path.display());
    Ok(())
}
