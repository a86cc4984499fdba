use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

pub const CONFIG_FILE: &str = "config/Gex.toml";
pub const ENV_PREFIX: &str = "GEX_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Gex.toml` overlaid with `GEX_*`
    /// environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration source cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(CONFIG_FILE)
    }

    /// Loads configuration from a specific TOML file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration source cannot be parsed.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Loads configuration with a profile overlay (`config/Gex.<profile>.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration source cannot be parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Toml::file(format!("config/Gex.{profile}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load().map_err(|e| e.to_string())?;
            assert_eq!(config.gateway.min_interval_secs, 15);
            assert_eq!(config.gateway.cache_ttl_secs, 300);
            assert_eq!(config.gateway.backoff_ladder_secs, vec![30, 60, 120, 300]);
            assert_eq!(config.regime.min_bars_for_regime, 2);
            assert_eq!(config.risk.max_concurrent_per_strategy, 3);
            Ok(())
        });
    }

    #[test]
    fn toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Gex.toml",
                r#"
                [gateway]
                min_interval_secs = 20
                backoff_ladder_secs = [10, 20]

                [risk]
                daily_loss_pct = 1.5
                "#,
            )?;
            let config = ConfigLoader::load().map_err(|e| e.to_string())?;
            assert_eq!(config.gateway.min_interval_secs, 20);
            assert_eq!(config.gateway.backoff_ladder_secs, vec![10, 20]);
            assert_eq!(config.gateway.cache_ttl_secs, 300);
            assert_eq!(config.risk.daily_loss_pct, dec!(1.5));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Gex.toml", "[gateway]\nmin_interval_secs = 20\n")?;
            jail.set_env("GEX_GATEWAY__MIN_INTERVAL_SECS", "30");
            jail.set_env("GEX_REGIME__DECISION_COOLDOWN_BARS", "5");
            let config = ConfigLoader::load().map_err(|e| e.to_string())?;
            assert_eq!(config.gateway.min_interval_secs, 30);
            assert_eq!(config.regime.decision_cooldown_bars, 5);
            Ok(())
        });
    }
}
