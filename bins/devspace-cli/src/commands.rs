// CLI commands for running files and managing Devspace configuration
use anyhow::{bail, Context, Result};
use devspace_common::config::{LanguageSettings, LanguagesFile, USER_ID_PARAM};
use devspace_common::protocol::{decode_outbound, encode, InboundMessage, OutboundMessage};
use devspace_common::types::{Language, RunRequest};
use futures_util::{SinkExt, Stream, StreamExt};
use std::fs;
use std::path::Path;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub struct RunOptions<'a> {
    pub file: &'a str,
    pub user: &'a str,
    pub language: Option<&'a str>,
    pub remote_path: Option<&'a str>,
    pub input: Option<&'a str>,
    pub server: &'a str,
}

/// Pick the language from the file extension
pub fn infer_language(file: &str) -> Result<Language> {
    let ext = Path::new(file)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match Language::ALL.iter().find(|l| l.file_extension() == ext) {
        Some(language) => Ok(*language),
        None => bail!("Cannot infer language from '{}', pass --language", file),
    }
}

/// Connection URL carrying the user id
pub fn session_url(server: &str, user: &str) -> String {
    let separator = if server.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", server, separator, USER_ID_PARAM, user)
}

fn default_remote_path(file: &str) -> Result<String> {
    Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' has no file name", file))
}

/// Upload the file, run it, print its output and return its exit code
pub async fn run_file(opts: &RunOptions<'_>) -> Result<i32> {
    let code = fs::read_to_string(opts.file)
        .with_context(|| format!("Failed to read {}", opts.file))?;
    let language = match opts.language {
        Some(name) => name.to_string(),
        None => infer_language(opts.file)?.to_string(),
    };
    let remote_path = match opts.remote_path {
        Some(path) => path.to_string(),
        None => default_remote_path(opts.file)?,
    };
    let input = match opts.input {
        Some(path) => Some(fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?),
        None => None,
    };

    let url = session_url(opts.server, opts.user);
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    eprintln!("🔌 Connected to {}", opts.server);

    let requests = [
        InboundMessage::CodeChange {
            filepath: remote_path.clone(),
            code,
        },
        InboundMessage::ExecRun(RunRequest {
            language,
            entry_file: remote_path,
            input,
        }),
    ];

    let mut exit_code = 0;
    for request in requests {
        socket
            .send(Message::Text(encode(&request)?))
            .await
            .context("Failed to send request")?;

        match next_reply(&mut socket).await? {
            OutboundMessage::Saved { path } => eprintln!("✅ Saved {}", path),
            OutboundMessage::Output { output, exit_code: code } => {
                print!("{}", output);
                exit_code = code.map(|c| c as i32).unwrap_or(1);
            }
            OutboundMessage::Error { message } => bail!("Server error: {}", message),
        }
    }

    let _ = socket.close(None).await;
    Ok(exit_code)
}

async fn next_reply<S>(socket: &mut S) -> Result<OutboundMessage>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = socket.next().await {
        match frame.context("Connection error")? {
            Message::Text(text) => {
                return decode_outbound(&text).with_context(|| format!("Unexpected reply: {}", text))
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }
    bail!("Connection closed before a reply arrived")
}

/// Initialize config/languages.json under `path`
pub fn init_project(path: &str, force: bool) -> Result<()> {
    println!("🚀 Initializing Devspace config at: {}", path);

    let config_dir = Path::new(path).join("config");
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create directory: {}", config_dir.display()))?;

    let languages_json_path = config_dir.join("languages.json");
    if languages_json_path.exists() && !force {
        println!("  ⏭️  Kept existing config/languages.json (use --force to overwrite)");
        return Ok(());
    }

    let json_content = serde_json::to_string_pretty(&LanguagesFile::default())
        .context("Failed to serialize languages.json")?;
    fs::write(&languages_json_path, json_content).context("Failed to write languages.json")?;
    println!("  ✅ Created: config/languages.json");

    println!("\n📋 Next steps:");
    println!("  1. Adjust images and limits in config/languages.json");
    println!("  2. Start the server: devspace-server");
    println!("  3. Run a file: devspace-cli run main.py --user u1");
    Ok(())
}

fn load_settings(config: &str) -> Result<Vec<LanguageSettings>> {
    let path = Path::new(config);
    if !path.exists() {
        return Ok(LanguagesFile::default().languages);
    }
    let content = fs::read_to_string(path).context("Failed to read languages.json")?;
    let file: LanguagesFile = serde_json::from_str(&content).context("Failed to parse languages.json")?;
    Ok(file.languages)
}

/// Print the supported languages with their configured images
pub fn list_languages(config: &str) -> Result<()> {
    let settings = load_settings(config)?;
    println!("{:<12} {:<5} {:<16} {:>8} {:>5}", "LANGUAGE", "EXT", "IMAGE", "MEM(MB)", "CPU");
    for language in Language::ALL {
        let entry = settings
            .iter()
            .find(|s| s.name == language.as_str())
            .cloned()
            .unwrap_or_else(|| LanguageSettings::builtin(language));
        println!(
            "{:<12} {:<5} {:<16} {:>8} {:>5}",
            language.as_str(),
            language.file_extension(),
            entry.image,
            entry.memory_limit_mb,
            entry.cpu_limit
        );
    }
    Ok(())
}
