//! Fixed per-language command templates.
//!
//! Each template is a constant `sh -c` script. The entry file, stdin file,
//! build directory and (for Java) main class reach the script only as
//! positional parameters, so file names never become shell syntax.

use crate::error::{Result, WorkspaceError};
use devspace_common::types::Language;
use std::path::Path;
use std::time::Duration;

/// Exit status coreutils `timeout` reports when it had to stop the command
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Seconds between TERM and KILL once the deadline passes
const KILL_AFTER_SECS: &str = "2";

/// $0 of the wrapper script, shows up in error messages
const SCRIPT_NAME: &str = "devspace-run";

fn script(language: Language) -> &'static str {
    match language {
        Language::Python => r#"exec python -u "$1" < "$2""#,
        Language::Javascript => r#"exec node "$1" < "$2""#,
        Language::Cpp => {
            r#"mkdir -p "$3" && g++ -o "$3/a.out" "$1" && "$3/a.out" < "$2"; rc=$?; rm -rf "$3"; exit $rc"#
        }
        Language::Java => {
            r#"mkdir -p "$3" && javac -d "$3" "$1" && java -cp "$3" "$4" < "$2"; rc=$?; rm -rf "$3"; exit $rc"#
        }
        Language::Go => r#"exec go run "$1" < "$2""#,
    }
}

/// Inputs of one run, all already validated
#[derive(Debug, Clone)]
pub struct CommandSpec<'a> {
    pub language: Language,
    /// Entry file relative to the workspace, forward slashes
    pub entry: &'a str,
    /// Stdin scratch file relative to the workspace, forward slashes
    pub stdin: &'a str,
    pub run_id: &'a str,
    pub timeout: Duration,
}

/// Build the argv for one run.
pub fn build_argv(spec: &CommandSpec<'_>) -> Result<Vec<String>> {
    let timeout = format!("{:.3}s", spec.timeout.as_secs_f64());
    let mut argv = vec![
        "timeout".to_string(),
        "-k".to_string(),
        KILL_AFTER_SECS.to_string(),
        timeout,
        "sh".to_string(),
        "-c".to_string(),
        script(spec.language).to_string(),
        SCRIPT_NAME.to_string(),
        // ./ keeps names starting with '-' from being read as options
        format!("./{}", spec.entry),
        format!("./{}", spec.stdin),
        format!("/tmp/devspace-{}", spec.run_id),
    ];
    if spec.language == Language::Java {
        argv.push(java_main_class(spec.entry)?);
    }
    Ok(argv)
}

/// Java runs the class named after the entry file.
fn java_main_class(entry: &str) -> Result<String> {
    let stem = Path::new(entry)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut chars = stem.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_' || first == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        None => false,
    };
    if !valid {
        return Err(WorkspaceError::InvalidPath(format!(
            "{} does not name a Java class",
            entry
        )));
    }
    Ok(stem)
}
