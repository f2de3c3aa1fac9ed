use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages a workspace can run. The set is closed: each variant has a
/// fixed command template on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Cpp,
    Java,
    Go,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Javascript,
        Language::Cpp,
        Language::Java,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Go => "go",
        }
    }

    /// Conventional source file extension, without the dot
    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Javascript => "js",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "go" => Ok(Language::Go),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

/// Identifies at most one live execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentKey {
    pub user_id: String,
    pub language: Language,
}

impl EnvironmentKey {
    pub fn new(user_id: impl Into<String>, language: Language) -> Self {
        Self {
            user_id: user_id.into(),
            language,
        }
    }
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.language)
    }
}

/// A request to run one source file of the user's workspace.
///
/// `language` stays a raw string until the server validates it, so an
/// unknown language is reported as unsupported rather than as a malformed
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub language: String,
    pub entry_file: String,
    #[serde(default)]
    pub input: Option<String>,
}

/// Combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub text: String,
    pub exit_code: Option<i64>,
}
