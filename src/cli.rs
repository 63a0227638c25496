use std::path::PathBuf;

use clap::Parser;

use crate::services::settings::AppSettings;

#[derive(Debug, Parser)]
#[command(name = "persona-chat", version, about = "Chat with a persona over an OpenAI-compatible API")]
pub struct Cli {
    /// Directory holding chat history, request log and settings
    #[arg(long, env = "PERSONA_CHAT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Provider API key (prompted for when absent)
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible API, without the /v1 suffix
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    /// Maximum messages kept in history, persona included
    #[arg(long)]
    pub max_history: Option<usize>,

    /// File whose contents replace the built-in persona
    #[arg(long)]
    pub persona_file: Option<PathBuf>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Do not check the API key on startup
    #[arg(long)]
    pub skip_validation: bool,
}

impl Cli {
    /// Apply command-line overrides. Returns whether anything changed.
    pub fn apply(&self, settings: &mut AppSettings) -> bool {
        let before = settings.clone();

        if let Some(model) = &self.model {
            settings.model.clone_from(model);
        }
        if let Some(base_url) = &self.base_url {
            settings.base_url.clone_from(base_url);
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = Some(max_tokens);
        }
        if let Some(top_p) = self.top_p {
            settings.top_p = top_p;
        }
        if let Some(max_history) = self.max_history {
            settings.max_history = max_history;
        }
        if self.no_stream {
            settings.stream_responses = false;
        }

        *settings != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    Reset,
    Export(Option<PathBuf>),
    ExportLog(Option<PathBuf>),
    Validate,
    History,
    Settings,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }

        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Chat(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };
        let path = arg.map(PathBuf::from);

        match name {
            "reset" | "clear" => Command::Reset,
            "export" => Command::Export(path),
            "log" => Command::ExportLog(path),
            "validate" => Command::Validate,
            "history" => Command::History,
            "settings" => Command::Settings,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

pub const HELP: &str = "\
Commands:
  /reset            start over with only the persona
  /export [path]    write the conversation to a text file
  /log [path]       write the request log report to a text file
  /validate         check the API key
  /history          show the conversation so far
  /settings         show the active settings
  /help             show this help
  /quit             leave
Ctrl-C while a reply streams discards that reply.";
