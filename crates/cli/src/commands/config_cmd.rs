//! `storyloom config`: Show or initialize configuration.

use anyhow::Context;
use storyloom_config::AppConfig;

const REDACTED: &str = "********";

pub async fn run(init: bool) -> anyhow::Result<()> {
    let config_path = AppConfig::config_dir().join("config.toml");

    if init {
        if config_path.exists() {
            println!("Config already exists at {}", config_path.display());
            return Ok(());
        }
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(&config_path, AppConfig::default_toml())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config = AppConfig::load().context("Failed to load config")?;
    println!("# {}", config_path.display());
    println!("{}", toml::to_string_pretty(&redacted(config))?);

    if !config_path.exists() {
        eprintln!("No config file yet; run `storyloom config --init` to create one.");
    }
    Ok(())
}

/// Copy of `config` with every API key masked.
fn redacted(mut config: AppConfig) -> AppConfig {
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    if config.embedding.api_key.is_some() {
        config.embedding.api_key = Some(REDACTED.into());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_config::ProviderConfig;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn keys_are_masked() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-secret".into()),
                ..Default::default()
            },
        );
        config.embedding.api_key = Some("sk-embed".into());

        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(!shown.contains("sk-embed"));
        assert!(shown.contains(REDACTED));
    }
}
