use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command, HELP};
use crate::config::DEFAULT_PERSONA;
use crate::models::Role;
use crate::providers::{AiProvider, OpenAiCompatibleProvider};
use crate::services::chat::{self, ChatDispatchParams, TurnEvent};
use crate::services::conversation::ConversationStore;
use crate::services::export::export_conversation;
use crate::services::request_log::RequestLog;
use crate::services::session::{default_data_dir, ensure_data_dir, SessionContext};
use crate::services::settings::SettingsService;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct App {
    ctx: SessionContext,
    store: ConversationStore,
    log: RequestLog,
    provider: Arc<dyn AiProvider>,
    persona_file: Option<PathBuf>,
    api_key: Option<String>,
    skip_validation: bool,
    input: Lines<BufReader<Stdin>>,
}

impl App {
    pub fn bootstrap(cli: Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        ensure_data_dir(&data_dir)?;

        let mut settings = SettingsService::load(&data_dir);
        if cli.apply(&mut settings) {
            settings.validate().context("Invalid command-line settings")?;
            if let Err(e) = SettingsService::save(&data_dir, &settings) {
                tracing::warn!("{:#}", e);
            }
        } else {
            settings.validate().context("Invalid settings file")?;
        }

        let persona = load_persona(cli.persona_file.as_deref())?;
        let ctx = SessionContext::new(data_dir, settings, persona);
        let store = ConversationStore::open(&ctx);
        let log = RequestLog::open(&ctx);
        let provider = OpenAiCompatibleProvider::new(CONNECT_TIMEOUT)
            .context("Failed to initialize HTTP client")?;

        Ok(Self {
            ctx,
            store,
            log,
            provider: Arc::new(provider),
            persona_file: cli.persona_file,
            api_key: cli.api_key.filter(|k| !k.trim().is_empty()),
            skip_validation: cli.skip_validation,
            input: BufReader::new(tokio::io::stdin()).lines(),
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let Some(api_key) = self.obtain_api_key().await? else {
            println!("No API key given. Bye.");
            return Ok(());
        };

        if !self.skip_validation {
            self.validate(&api_key).await;
        }

        println!(
            "Chatting with {} ({} earlier messages). Type /help for commands.",
            self.ctx.settings.model,
            self.store.conversation().turn_count()
        );

        loop {
            prompt("> ");
            let line = tokio::select! {
                line = self.input.next_line() => line.context("Failed to read input")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };

            match Command::parse(&line) {
                Command::Empty => {}
                Command::Chat(text) => self.chat(&api_key, &text).await,
                Command::Reset => self.reset(),
                Command::Export(path) => {
                    let text = export_conversation(self.store.messages());
                    self.write_export(path, "conversation", &text);
                }
                Command::ExportLog(path) => {
                    let text = self.log.export();
                    self.write_export(path, "request-log", &text);
                }
                Command::Validate => self.validate(&api_key).await,
                Command::History => self.print_history(),
                Command::Settings => self.print_settings(),
                Command::Help => println!("{}", HELP),
                Command::Quit => break,
                Command::Unknown(name) => println!("Unknown command /{}. Try /help.", name),
            }
        }

        Ok(())
    }

    async fn obtain_api_key(&mut self) -> Result<Option<String>> {
        if let Some(key) = self.api_key.take() {
            return Ok(Some(key));
        }

        loop {
            prompt("API key: ");
            match self.input.next_line().await.context("Failed to read API key")? {
                Some(line) if !line.trim().is_empty() => return Ok(Some(line.trim().to_string())),
                Some(_) => println!("Please enter your API key to continue."),
                None => return Ok(None),
            }
        }
    }

    async fn validate(&self, api_key: &str) {
        match chat::validate_api_key(self.provider.as_ref(), api_key, &self.ctx.settings).await {
            Ok(models) => {
                println!("API key accepted ({} models available).", models.len());
                if !models.iter().any(|m| m.id == self.ctx.settings.model) {
                    println!(
                        "Note: model {} is not in the provider's list.",
                        self.ctx.settings.model
                    );
                }
            }
            Err(e) => {
                tracing::warn!("API key validation failed: {}", e);
                println!("{}\n{}", e, e.hint());
            }
        }
    }

    async fn chat(&mut self, api_key: &str, text: &str) {
        let params = ChatDispatchParams {
            provider: Arc::clone(&self.provider),
            api_key,
            settings: &self.ctx.settings,
        };

        let cancel_token = CancellationToken::new();
        let watcher = {
            let cancel_token = cancel_token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel_token.cancel();
                }
            })
        };

        let mut warnings = Vec::new();
        let result = chat::run_turn(
            &mut self.store,
            &mut self.log,
            &params,
            text,
            cancel_token,
            |event| match event {
                TurnEvent::Token(chunk) => {
                    print!("{}", chunk);
                    let _ = std::io::stdout().flush();
                }
                TurnEvent::PersistWarning(e) => warnings.push(e),
            },
        )
        .await;
        watcher.abort();
        println!();

        for warning in warnings {
            println!("Warning: history not saved ({}). The session continues.", warning);
        }

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    reply_chars = outcome.reply.chars().count(),
                    tokens_in = ?outcome.tokens_in,
                    tokens_out = ?outcome.tokens_out,
                    "Turn complete"
                );
            }
            Err(e) => println!("Error: {}\n{}", e, e.hint()),
        }
    }

    fn reset(&mut self) {
        if let Some(path) = &self.persona_file {
            match load_persona(Some(path.as_path())) {
                Ok(persona) => self.store.set_persona(persona),
                Err(e) => println!("Keeping the current persona: {:#}", e),
            }
        }

        match self.store.reset().warning() {
            None => println!("Conversation cleared."),
            Some(e) => println!("Conversation cleared, but not saved ({}).", e),
        }
    }

    fn write_export(&self, path: Option<PathBuf>, prefix: &str, text: &str) {
        let path = path.unwrap_or_else(|| self.ctx.export_path(prefix));
        match std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))
        {
            Ok(()) => println!("Saved {}", path.display()),
            Err(e) => {
                tracing::error!("{:#}", e);
                println!("Export failed: {:#}", e);
            }
        }
    }

    fn print_history(&self) {
        println!("[persona] {}", self.store.conversation().system_prompt());
        for msg in self.store.messages() {
            let label = match msg.role {
                Role::System => continue,
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            println!("[{}] {}", label, msg.content);
        }
    }

    fn print_settings(&self) {
        match serde_json::to_string_pretty(&self.ctx.settings) {
            Ok(json) => println!(
                "{}\nData directory: {}\nRequest log: {} entries",
                json,
                self.ctx.data_dir.display(),
                self.log.entries().len()
            ),
            Err(e) => println!("Failed to render settings: {}", e),
        }
    }
}

fn load_persona(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            let persona = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read persona file {}", path.display()))?;
            Ok(persona.trim().to_string())
        }
        None => Ok(DEFAULT_PERSONA.to_string()),
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}
