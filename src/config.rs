pub const APP_NAME: &str = "persona-chat";

pub const CONVERSATION_FILE: &str = "chat_history.json";
pub const REQUEST_LOG_FILE: &str = "request_log.json";
pub const SETTINGS_FILE: &str = "settings.json";

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai";
pub const DEFAULT_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

pub const DEFAULT_MAX_HISTORY: usize = 50;
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 1000;
pub const DEFAULT_PREVIEW_CHARS: usize = 100;
pub const PREVIEW_ELLIPSIS: &str = "...";

/// Seed persona used when no `--persona-file` is given.
pub const DEFAULT_PERSONA: &str = "You are Leticia, a cheerful and upbeat architect. \
Answer in a light, informal and friendly tone, full of enthusiasm.";
