use crate::models::{Message, RequestLogEntry, Role};

pub fn export_conversation(messages: &[Message]) -> String {
    let mut output = String::from("Conversation\n============\n\n");

    if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
        output.push_str(&format!("Persona: {}\n\n", system.content.trim()));
    }

    output.push_str("---\n\n");

    for msg in messages.iter().filter(|m| m.role != Role::System) {
        let role_label = match msg.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
            Role::System => continue,
        };
        output.push_str(&format!("[{}]\n{}\n\n", role_label, msg.content));
    }

    output
}

pub fn export_request_log(entries: &[RequestLogEntry]) -> String {
    let mut output = format!("Request log ({} entries)\n\n", entries.len());

    for (i, entry) in entries.iter().enumerate() {
        output.push_str(&format!(
            "#{}\nTimestamp: {}\nRequest: {}\nResponse: {}\nResponse length: {} characters\n\n",
            i + 1,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.user_request,
            entry.response_preview,
            entry.response_length,
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_conversation_export() {
        let messages = vec![
            Message::system("Be nice."),
            Message::user("Oi"),
            Message::assistant("Olá!"),
        ];
        assert_eq!(
            export_conversation(&messages),
            "Conversation\n============\n\nPersona: Be nice.\n\n---\n\n[You]\nOi\n\n[Assistant]\nOlá!\n\n"
        );
    }

    #[test]
    fn test_request_log_export_numbers_in_order() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap();
        let entries = vec![
            RequestLogEntry::new(at, "first", "reply one", 100),
            RequestLogEntry::new(at, "second", &"z".repeat(120), 100),
        ];

        let report = export_request_log(&entries);
        assert!(report.starts_with("Request log (2 entries)\n\n#1\nTimestamp: 2025-03-01 12:30:05 UTC\nRequest: first\n"));
        assert!(report.contains("Response: reply one\nResponse length: 9 characters"));

        let first = report.find("#1").unwrap();
        let second = report.find("#2").unwrap();
        assert!(first < second);
        assert!(report.contains("Response length: 120 characters"));
    }

    #[test]
    fn test_empty_request_log_export() {
        assert_eq!(export_request_log(&[]), "Request log (0 entries)\n\n");
    }
}
