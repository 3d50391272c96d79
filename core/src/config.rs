use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::constants::*;
use crate::errors::ConfigError;

/// Name of the implicit section holding keys that appear before any `[section]` header.
pub const ROOT_SECTION: &str = "";

/// Ini-style settings: `[section]` headers, `key = value` pairs, `;` or `#` comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse settings from text. `source_name` is only used in error messages.
    pub fn parse(content: &str, source_name: &str) -> Result<Self, ConfigError> {
        let mut settings = Settings::new();
        let mut current = ROOT_SECTION.to_string();

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::Parse {
                    source_name: source_name.to_string(),
                    line: index + 1,
                    reason: "unterminated section header".to_string(),
                })?;
                current = name.trim().to_string();
                settings.sections.entry(current.clone()).or_default();
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    if key.is_empty() {
                        return Err(ConfigError::Parse {
                            source_name: source_name.to_string(),
                            line: index + 1,
                            reason: "empty key".to_string(),
                        });
                    }
                    settings.set(&current, key, unquote(value.trim()));
                }
                None => {
                    return Err(ConfigError::Parse {
                        source_name: source_name.to_string(),
                        line: index + 1,
                        reason: format!("expected 'key = value', got '{}'", line),
                    });
                }
            }
        }

        Ok(settings)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(backend) = env::var(HTTP_CLIENT_ENV_VAR) {
            debug!("{} overrides [http] client with '{}'", HTTP_CLIENT_ENV_VAR, backend);
            self.set(HTTP_SECTION, HTTP_CLIENT_KEY, backend);
        }
        self
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(key))
            .map(|value| value.as_str())
    }

    /// Like [`Settings::get`] but treats an empty value as absent.
    pub fn get_nonempty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|value| !value.is_empty())
    }

    pub fn require(&self, section: &str, key: &str) -> Result<&str, ConfigError> {
        self.get_nonempty(section, key)
            .ok_or_else(|| ConfigError::missing(section, key))
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get(section, key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(Some(true)),
            "" | "0" | "false" | "off" | "no" | "none" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>, ConfigError> {
        let Some(value) = self.get(section, key) else {
            return Ok(None);
        };
        value
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    /// The configured transport backend name, falling back to the default backend.
    pub fn http_backend(&self) -> &str {
        self.get_nonempty(HTTP_SECTION, HTTP_CLIENT_KEY)
            .unwrap_or(DEFAULT_HTTP_BACKEND)
    }
}

fn unquote(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_root_keys() {
        let settings = Settings::parse(
            "; oauth test settings\nconsumer_key = abc\n\n[http]\nclient = curl\n# trailing comment\n[user:alice]\ntoken = \"t0k\"\n",
            "inline",
        )
        .unwrap();

        assert_eq!(settings.get(ROOT_SECTION, "consumer_key"), Some("abc"));
        assert_eq!(settings.get("http", "client"), Some("curl"));
        assert_eq!(settings.get("user:alice", "token"), Some("t0k"));
        assert!(settings.has_section("user:alice"));
        assert_eq!(settings.get("http", "missing"), None);
    }

    #[test]
    fn test_empty_value_is_missing_for_require() {
        let settings = Settings::parse("consumer_secret =\n", "inline").unwrap();
        assert_eq!(settings.get(ROOT_SECTION, "consumer_secret"), Some(""));
        assert!(matches!(
            settings.require(ROOT_SECTION, "consumer_secret"),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = Settings::parse("[http]\nclient curl\n", "broken.ini").unwrap_err();
        match err {
            ConfigError::Parse {
                source_name, line, ..
            } => {
                assert_eq!(source_name, "broken.ini");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(Settings::parse("[http\n", "broken.ini").is_err());
    }

    #[test]
    fn test_bool_values() {
        let settings = Settings::parse("[http]\na = On\nb = 0\nc = maybe\n", "inline").unwrap();
        assert_eq!(settings.get_bool("http", "a").unwrap(), Some(true));
        assert_eq!(settings.get_bool("http", "b").unwrap(), Some(false));
        assert_eq!(settings.get_bool("http", "zzz").unwrap(), None);
        assert!(settings.get_bool("http", "c").is_err());
    }

    #[test]
    fn test_http_backend_default() {
        assert_eq!(Settings::new().http_backend(), DEFAULT_HTTP_BACKEND);
        let mut settings = Settings::new();
        settings.set(HTTP_SECTION, HTTP_CLIENT_KEY, "socket");
        assert_eq!(settings.http_backend(), "socket");
    }
}
