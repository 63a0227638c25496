pub mod chat;
pub mod conversation;
pub mod export;
pub mod request_log;
pub mod session;
pub mod settings;
pub mod storage;
