use config::{Config, ConfigError, Environment, File};
use ohlcv_core::config::AppConfig;
use std::path::Path;

/// 默认配置文件 (可缺省)
pub const DEFAULT_CONFIG_FILE: &str = "config/default";
/// 指定额外配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "OHLCV_CONFIG";
/// 环境变量覆盖前缀，例如 `OHLCV__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "OHLCV";

/// # Summary
/// 按优先级合并配置来源。
///
/// # Logic
/// 1. 以 `AppConfig::default()` 作为基线 (结构体上的 `serde(default)`)。
/// 2. 叠加 `config/default.toml` (不存在时跳过)。
/// 3. 叠加 `extra_file` 指定的文件 (必须存在)。
/// 4. 叠加 `OHLCV__SECTION__KEY` 环境变量，`market.symbols` 以逗号分隔。
///
/// # Arguments
/// * `extra_file`: 额外配置文件路径，通常来自 `OHLCV_CONFIG`。
pub fn load(extra_file: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

    if let Some(path) = extra_file {
        builder = builder.add_source(File::from(path));
    }

    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("market.symbols")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ohlcv.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[market]
symbols = ["msft", "AAPL"]
interval = "15m"

[completeness]
in_progress_tolerance = 3
"#
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.market.normalized_symbols().unwrap(), vec!["MSFT", "AAPL"]);
        assert_eq!(config.market.interval, "15m");
        assert_eq!(config.market.timezone, "America/Chicago");
        assert_eq!(config.completeness.in_progress_tolerance, 3);
        assert_eq!(config.completeness.full_day_percent, 95);
        assert_eq!(config.poller.check_interval_secs, 60);
    }

    #[test]
    fn test_missing_extra_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
