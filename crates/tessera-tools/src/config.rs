use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// 从 TOML 文件读取配置
///
/// 文件不存在时返回 `T::default()`，并输出一条 info 日志；解析失败时返回错误。
pub fn load_toml<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("config file {:?} not found, using defaults", path);
        return Ok(T::default());
    }

    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config file {:?}", path))?;
    parse_toml(&text).with_context(|| format!("failed to parse config file {:?}", path))
}

/// 从 TOML 文本解析配置
pub fn parse_toml<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_parse_toml_partial_fields() {
        let sample: Sample = parse_toml("count = 7").unwrap();
        assert_eq!(sample, Sample { name: String::new(), count: 7 });
    }

    #[test]
    fn test_load_missing_file_gives_default() {
        let path = std::env::temp_dir().join("tessera-tools-missing-config.toml");
        let _ = std::fs::remove_file(&path);
        let sample: Sample = load_toml(&path).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_parse_toml_rejects_bad_type() {
        let result: anyhow::Result<Sample> = parse_toml("count = \"seven\"");
        assert!(result.is_err());
    }
}
