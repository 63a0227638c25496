use uuid::Uuid;

use super::session::SessionContext;
use super::storage::{Durability, JsonFile, StoreError};
use crate::models::{Conversation, Message, Role};

/// In-progress assistant reply. Chunks are appended in call order through
/// `&mut self`; the buffer only ever grows.
#[derive(Debug)]
pub struct StreamedTurn {
    id: Uuid,
    buffer: String,
}

impl StreamedTurn {
    /// Append one fragment and return the running reply for display.
    pub fn append_chunk(&mut self, chunk: &str) -> &str {
        self.buffer.push_str(chunk);
        &self.buffer
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenTurn {
    id: Uuid,
    len_at_open: usize,
}

/// Write-through cache of the session's conversation file.
pub struct ConversationStore {
    file: JsonFile<Conversation>,
    conversation: Conversation,
    persona: String,
    max_history: usize,
    open_turn: Option<OpenTurn>,
}

impl ConversationStore {
    /// Load the conversation for this session. Missing or unreadable state
    /// starts a fresh conversation seeded with the persona.
    pub fn open(ctx: &SessionContext) -> Self {
        let file: JsonFile<Conversation> = JsonFile::new(ctx.conversation_path());
        let max_history = ctx.settings.max_history;

        let mut conversation = match file.load_or_none() {
            Some(stored) => Conversation::from_messages(stored.into_messages(), &ctx.persona),
            None => Conversation::seeded(&ctx.persona),
        };
        conversation.cap_to_limit(max_history);

        tracing::debug!(
            path = %file.path().display(),
            messages = conversation.len(),
            "Conversation loaded"
        );

        Self {
            file,
            conversation,
            persona: ctx.persona.clone(),
            max_history,
            open_turn: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> Durability {
        self.conversation.push(Message::user(text));
        self.persist()
    }

    /// Open an accumulation buffer for the next assistant reply. Opening a
    /// new turn supersedes any turn still open.
    pub fn begin_streamed_turn(&mut self) -> StreamedTurn {
        let id = Uuid::new_v4();
        if let Some(prev) = self.open_turn.replace(OpenTurn {
            id,
            len_at_open: self.conversation.len(),
        }) {
            tracing::debug!(turn = %prev.id, "Superseded open turn");
        }
        StreamedTurn {
            id,
            buffer: String::new(),
        }
    }

    pub fn commit_streamed_turn(&mut self, turn: StreamedTurn) -> Result<Durability, StoreError> {
        self.take_open_turn(&turn)?;
        self.conversation.push(Message::assistant(turn.buffer));
        self.conversation.cap_to_limit(self.max_history);
        Ok(self.persist())
    }

    /// Drop the partial reply. The user message that opened the turn is
    /// withdrawn as well so a retry does not record it twice.
    pub fn abort_streamed_turn(&mut self, turn: StreamedTurn) -> Result<Durability, StoreError> {
        let open = self.take_open_turn(&turn)?;
        tracing::debug!(turn = %turn.id, discarded = turn.buffer.len(), "Aborted streamed turn");

        let opened_by_user = self.conversation.len() == open.len_at_open
            && self.conversation.last().map(|m| m.role) == Some(Role::User);
        if opened_by_user {
            self.conversation.pop();
        }
        Ok(self.persist())
    }

    /// Clear the conversation back to a single persona message.
    pub fn reset(&mut self) -> Durability {
        self.open_turn = None;
        self.conversation = Conversation::seeded(&self.persona);
        self.persist()
    }

    /// Use a new persona from the next reset on.
    pub fn set_persona(&mut self, persona: impl Into<String>) {
        self.persona = persona.into();
    }

    pub fn persist(&self) -> Durability {
        self.file.save(&self.conversation).into()
    }

    fn take_open_turn(&mut self, turn: &StreamedTurn) -> Result<OpenTurn, StoreError> {
        match self.open_turn {
            Some(open) if open.id == turn.id => {
                self.open_turn = None;
                Ok(open)
            }
            _ => Err(StoreError::StaleTurn),
        }
    }
}
