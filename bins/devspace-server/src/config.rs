// Server and language configuration for the devspace server
use anyhow::{bail, Context, Result};
use devspace_common::config::{LanguageSettings, LanguagesFile, DEFAULT_BIND_ADDR, DEFAULT_LANGUAGES_CONFIG};
use devspace_common::types::Language;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_RUN_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub workspaces_dir: PathBuf,
    pub run_timeout: Duration,
    pub languages_config: PathBuf,
    pub json_logs: bool,
}

impl ServerConfig {
    /// Read configuration from `DEVSPACE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            std::env::var("DEVSPACE_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let workspaces_dir = std::env::var("DEVSPACE_WORKSPACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("workspaces"));

        let run_timeout_ms = match std::env::var("DEVSPACE_RUN_TIMEOUT_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("DEVSPACE_RUN_TIMEOUT_MS is not a number: {}", raw))?,
            Err(_) => DEFAULT_RUN_TIMEOUT_MS,
        };
        if run_timeout_ms == 0 {
            bail!("DEVSPACE_RUN_TIMEOUT_MS must be greater than zero");
        }

        let languages_config = std::env::var("DEVSPACE_LANGUAGES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LANGUAGES_CONFIG));

        let json_logs = std::env::var("DEVSPACE_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            workspaces_dir,
            run_timeout: Duration::from_millis(run_timeout_ms),
            languages_config,
            json_logs,
        })
    }
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageSettings>,
}

impl LanguageConfigManager {
    /// Load language settings from a languages.json file.
    ///
    /// Languages missing from the file keep their built-in settings; an
    /// entry naming a language outside the supported set is rejected.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let file: LanguagesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut manager = Self::builtin();
        for settings in file.languages {
            let language: Language = match settings.name.parse() {
                Ok(language) => language,
                Err(e) => bail!("{} in {}", e, config_path.display()),
            };
            if settings.image.trim().is_empty() {
                bail!("Language '{}' has an empty image", settings.name);
            }
            manager.configs.insert(language, settings);
        }

        Ok(manager)
    }

    /// Load from `path`, falling back to built-in settings if it does not exist
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "Language config not found, using built-in images"
            );
            return Ok(Self::builtin());
        }
        Self::load(path)
    }

    pub fn builtin() -> Self {
        let configs = Language::ALL
            .iter()
            .map(|l| (*l, LanguageSettings::builtin(*l)))
            .collect();
        Self { configs }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: Language) -> LanguageSettings {
        self.configs
            .get(&language)
            .cloned()
            .unwrap_or_else(|| LanguageSettings::builtin(language))
    }

    pub fn get_image(&self, language: Language) -> String {
        self.get_config(language).image
    }

    pub fn get_memory_limit_bytes(&self, language: Language) -> i64 {
        i64::from(self.get_config(language).memory_limit_mb) * 1024 * 1024
    }

    pub fn get_nano_cpus(&self, language: Language) -> i64 {
        (f64::from(self.get_config(language).cpu_limit) * 1_000_000_000.0) as i64
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().map(|l| l.to_string()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_covers_all_languages() {
        let manager = LanguageConfigManager::builtin();
        assert_eq!(manager.list_languages().len(), Language::ALL.len());
        assert_eq!(manager.get_image(Language::Python), "python:3.9");
        assert_eq!(manager.get_nano_cpus(Language::Go), 1_000_000_000);
    }

    #[test]
    fn test_load_overrides_single_language() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"languages":[{{"name":"python","image":"python:3.12-slim","memory_limit_mb":128,"cpu_limit":0.5}}]}}"#
        )
        .unwrap();

        let manager = LanguageConfigManager::load(file.path()).unwrap();
        assert_eq!(manager.get_image(Language::Python), "python:3.12-slim");
        assert_eq!(manager.get_memory_limit_bytes(Language::Python), 128 * 1024 * 1024);
        assert_eq!(manager.get_nano_cpus(Language::Python), 500_000_000);
        // untouched languages keep their defaults
        assert_eq!(manager.get_image(Language::Java), "openjdk:17");
    }

    #[test]
    fn test_load_rejects_unknown_language() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"languages":[{{"name":"cobol","image":"cobol:1","memory_limit_mb":128,"cpu_limit":0.5}}]}}"#
        )
        .unwrap();
        assert!(LanguageConfigManager::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LanguageConfigManager::load_or_builtin(&dir.path().join("nope.json")).unwrap();
        assert_eq!(manager.get_image(Language::Cpp), "gcc:11");
    }
}
