//! Chat helpers.

use std::cmp::Ordering;

use crate::db::ConversationSummary;
use crate::error::ValidationError;

/// Trim a message body and enforce the configured length limit.
pub fn validate_body(raw: &str, max_chars: usize) -> Result<String, ValidationError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(ValidationError::new("body", "message must not be empty"));
    }
    let len = body.chars().count();
    if len > max_chars {
        return Err(ValidationError::new(
            "body",
            format!("message is {len} characters, the limit is {max_chars}"),
        ));
    }
    Ok(body.to_string())
}

/// Inbox order: conversations with unread messages first, then by most
/// recent activity, then by client name.
pub fn sort_conversations(conversations: &mut [ConversationSummary]) {
    conversations.sort_by(|a, b| {
        let unread = (b.unread_count > 0).cmp(&(a.unread_count > 0));
        if unread != Ordering::Equal {
            return unread;
        }
        let a_last = a.last_message.as_ref().map(|m| m.created_at);
        let b_last = b.last_message.as_ref().map(|m| m.created_at);
        b_last
            .cmp(&a_last)
            .then_with(|| a.client_name.to_lowercase().cmp(&b.client_name.to_lowercase()))
    });
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::db::{ChatMessageRecord, Role};

    fn summary(name: &str, unread: i64, minutes_ago: Option<i64>) -> ConversationSummary {
        let client_id = Uuid::new_v4();
        ConversationSummary {
            client_id,
            client_name: name.to_string(),
            last_message: minutes_ago.map(|m| ChatMessageRecord {
                id: Uuid::new_v4(),
                client_id,
                sender_role: Role::Client,
                sender_account_id: None,
                body: "hi".to_string(),
                read_at: None,
                created_at: Utc::now() - Duration::minutes(m),
            }),
            unread_count: unread,
        }
    }

    #[test]
    fn body_rules() {
        assert_eq!(validate_body("  hello ", 10).expect("ok"), "hello");
        assert!(validate_body("   ", 10).is_err());
        assert!(validate_body(&"é".repeat(11), 10).is_err());
        assert!(validate_body(&"é".repeat(10), 10).is_ok());
    }

    #[test]
    fn inbox_ordering() {
        let mut inbox = vec![
            summary("Quiet", 0, None),
            summary("Recent read", 0, Some(1)),
            summary("Old unread", 3, Some(600)),
            summary("New unread", 1, Some(5)),
            summary("Another quiet", 0, None),
        ];
        sort_conversations(&mut inbox);
        let names: Vec<_> = inbox.iter().map(|c| c.client_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["New unread", "Old unread", "Recent read", "Another quiet", "Quiet"]
        );
    }
}
