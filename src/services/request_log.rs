use chrono::Utc;

use super::session::SessionContext;
use super::storage::{JsonFile, StoreError};
use crate::models::RequestLogEntry;

/// FIFO-capped log of requests and response summaries.
pub struct RequestLog {
    file: JsonFile<Vec<RequestLogEntry>>,
    entries: Vec<RequestLogEntry>,
    max_entries: usize,
    preview_chars: usize,
}

impl RequestLog {
    pub fn open(ctx: &SessionContext) -> Self {
        let file = JsonFile::new(ctx.request_log_path());
        let mut log = Self {
            entries: file.load_or_none().unwrap_or_default(),
            file,
            max_entries: ctx.settings.max_log_entries,
            preview_chars: ctx.settings.preview_chars,
        };
        log.evict_oldest();
        log
    }

    pub fn entries(&self) -> &[RequestLogEntry] {
        &self.entries
    }

    /// Append an entry and write the log. Callers are expected to discard
    /// the error: logging must never fail a chat turn.
    pub fn record(&mut self, user_text: &str, full_response: &str) -> Result<(), StoreError> {
        self.entries.push(RequestLogEntry::new(
            Utc::now(),
            user_text,
            full_response,
            self.preview_chars,
        ));
        self.evict_oldest();
        self.file.save(&self.entries)
    }

    pub fn export(&self) -> String {
        super::export::export_request_log(&self.entries)
    }

    fn evict_oldest(&mut self) {
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session::test_context;

    #[test]
    fn test_fifo_cap_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut log = RequestLog::open(&ctx);

        for i in 0..1001 {
            log.record(&format!("request {i}"), "ok").unwrap();
        }

        assert_eq!(log.entries().len(), 1000);
        assert_eq!(log.entries()[0].user_request, "request 1");
        assert_eq!(log.entries()[999].user_request, "request 1000");
        assert!(!log.entries().iter().any(|e| e.user_request == "request 0"));

        let reopened = RequestLog::open(&ctx);
        assert_eq!(reopened.entries(), log.entries());
    }

    #[test]
    fn test_record_builds_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RequestLog::open(&test_context(dir.path()));
        log.record("long", &"x".repeat(250)).unwrap();
        log.record("short", &"y".repeat(50)).unwrap();

        let long = &log.entries()[0];
        assert_eq!(long.response_preview, format!("{}...", "x".repeat(100)));
        assert_eq!(long.response_length, 250);

        let short = &log.entries()[1];
        assert_eq!(short.response_preview, "y".repeat(50));
        assert_eq!(short.response_length, 50);
    }

    #[test]
    fn test_open_trims_to_smaller_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        let mut log = RequestLog::open(&ctx);
        for i in 0..5 {
            log.record(&format!("r{i}"), "ok").unwrap();
        }

        ctx.settings.max_log_entries = 2;
        let log = RequestLog::open(&ctx);
        let requests: Vec<&str> = log.entries().iter().map(|e| e.user_request.as_str()).collect();
        assert_eq!(requests, vec!["r3", "r4"]);
    }

    #[test]
    fn test_write_failure_keeps_entry_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        std::fs::create_dir_all(ctx.request_log_path().join("blocker")).unwrap();

        let mut log = RequestLog::open(&ctx);
        assert!(log.record("hi", "there").is_err());
        assert_eq!(log.entries().len(), 1);
    }
}
