use serde::{Deserialize, Serialize};

use super::message::{Message, Role};

/// Ordered message log. The first message is always the persona system
/// message and it is the only system message in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn seeded(persona: &str) -> Self {
        Self {
            messages: vec![Message::system(persona)],
        }
    }

    /// Rebuild a conversation from persisted messages.
    ///
    /// The first system message found is moved to the front; any other
    /// system messages are dropped. If there is none, `persona` is seeded.
    pub fn from_messages(messages: Vec<Message>, persona: &str) -> Self {
        let mut system = None;
        let mut rest = Vec::with_capacity(messages.len());
        for msg in messages {
            if msg.role == Role::System {
                if system.is_none() {
                    system = Some(msg);
                }
            } else {
                rest.push(msg);
            }
        }

        let mut out = Vec::with_capacity(rest.len() + 1);
        out.push(system.unwrap_or_else(|| Message::system(persona)));
        out.extend(rest);
        Self { messages: out }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Number of user and assistant messages.
    pub fn turn_count(&self) -> usize {
        self.messages.len() - 1
    }

    pub fn push(&mut self, message: Message) {
        debug_assert!(message.role != Role::System);
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn pop(&mut self) -> Option<Message> {
        if self.messages.len() > 1 {
            self.messages.pop()
        } else {
            None
        }
    }

    pub fn cap_to_limit(&mut self, max_len: usize) {
        cap_to_limit(&mut self.messages, max_len);
    }
}

/// Keep the system message plus the most recent `max_len - 1` other messages,
/// in their original order. A `max_len` below 1 is treated as 1.
pub fn cap_to_limit(messages: &mut Vec<Message>, max_len: usize) {
    let max_len = max_len.max(1);
    if messages.len() <= max_len {
        return;
    }

    let system_idx = messages.iter().position(|m| m.role == Role::System);
    let keep_tail = max_len - usize::from(system_idx.is_some());

    let mut capped = Vec::with_capacity(max_len);
    if let Some(idx) = system_idx {
        capped.push(messages[idx].clone());
    }

    let non_system: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();
    let skip = non_system.len().saturating_sub(keep_tail);
    capped.extend(non_system.into_iter().skip(skip).cloned());

    *messages = capped;
}
