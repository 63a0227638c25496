pub mod conversation;
pub mod message;
pub mod request_log;

pub use conversation::Conversation;
pub use message::{Message, Role};
pub use request_log::RequestLogEntry;
