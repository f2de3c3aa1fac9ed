// Shared configuration schema and defaults for server and CLI
use crate::types::Language;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000/ws";
pub const DEFAULT_LANGUAGES_CONFIG: &str = "config/languages.json";

/// Query parameter carrying the user identifier on connection
pub const USER_ID_PARAM: &str = "id";

/// Per-language runtime settings as stored in languages.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSettings {
    pub name: String,
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguagesFile {
    pub languages: Vec<LanguageSettings>,
}

impl LanguageSettings {
    pub fn builtin(language: Language) -> Self {
        let image = match language {
            Language::Python => "python:3.9",
            Language::Javascript => "node:18",
            Language::Cpp => "gcc:11",
            Language::Java => "openjdk:17",
            Language::Go => "golang:1.18",
        };
        // compilers need more headroom than interpreters
        let memory_limit_mb = match language {
            Language::Cpp | Language::Java | Language::Go => 1024,
            Language::Python | Language::Javascript => 512,
        };
        Self {
            name: language.to_string(),
            image: image.to_string(),
            memory_limit_mb,
            cpu_limit: 1.0,
        }
    }
}

impl Default for LanguagesFile {
    fn default() -> Self {
        Self {
            languages: Language::ALL.iter().map(|l| LanguageSettings::builtin(*l)).collect(),
        }
    }
}
