use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Value, params};
use uuid::Uuid;

use crate::db::{
    ChatHistoryQuery, ChatMessageRecord, ChatStore, ConversationSummary, CreateChatMessageParams,
    Role,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, count, fmt_ts, get_opt_text, get_text, opt_text_owned, parse_opt_timestamp,
    parse_opt_uuid, parse_timestamp, parse_uuid,
};

const MESSAGE_COLUMNS: &str =
    "id, client_id, sender_role, sender_account_id, body, read_at, created_at";

fn row_to_chat_message(row: &libsql::Row) -> Result<ChatMessageRecord, DatabaseError> {
    let role_raw = get_text(row, 2);
    Ok(ChatMessageRecord {
        id: parse_uuid(&get_text(row, 0), "chat_message.id")?,
        client_id: parse_uuid(&get_text(row, 1), "chat_message.client_id")?,
        sender_role: Role::from_db_value(&role_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid sender role '{}'", role_raw))
        })?,
        sender_account_id: parse_opt_uuid(get_opt_text(row, 3), "chat_message.sender_account_id")?,
        body: get_text(row, 4),
        read_at: parse_opt_timestamp(get_opt_text(row, 5))?,
        created_at: parse_timestamp(&get_text(row, 6))?,
    })
}

impl LibSqlBackend {
    async fn last_chat_message(
        &self,
        conn: &libsql::Connection,
        client_id: &str,
    ) -> Result<Option<ChatMessageRecord>, DatabaseError> {
        let row = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
                     WHERE client_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![client_id],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_chat_message(&row)).transpose()
    }
}

#[async_trait]
impl ChatStore for LibSqlBackend {
    async fn create_chat_message(
        &self,
        input: &CreateChatMessageParams,
    ) -> Result<ChatMessageRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO chat_messages (id, client_id, sender_role, sender_account_id, body, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                input.client_id.to_string(),
                input.sender_role.as_str(),
                opt_text_owned(input.sender_account_id.map(|id| id.to_string())),
                input.body.as_str(),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_chat_message(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created message".to_string()))
    }

    async fn list_chat_messages(
        &self,
        client_id: Uuid,
        query: &ChatHistoryQuery,
    ) -> Result<Vec<ChatMessageRecord>, DatabaseError> {
        let mut values = vec![Value::Text(client_id.to_string())];
        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE client_id = ?1");
        if let Some(before) = query.before {
            values.push(Value::Text(fmt_ts(&before)));
            sql.push_str(" AND created_at < ?2");
        }
        values.push(Value::Integer(query.limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ?{}",
            values.len()
        ));

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_chat_message(&row)?);
        }
        // Newest page was fetched; return it oldest first.
        out.reverse();
        Ok(out)
    }

    async fn get_chat_message(
        &self,
        message_id: Uuid,
    ) -> Result<Option<ChatMessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1 LIMIT 1"),
                params![message_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_chat_message(&row)).transpose()
    }

    async fn mark_chat_read(
        &self,
        client_id: Uuid,
        reader: Role,
        at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE chat_messages SET read_at = ?3 \
                 WHERE client_id = ?1 AND sender_role = ?2 AND read_at IS NULL",
                params![
                    client_id.to_string(),
                    reader.counterpart().as_str(),
                    fmt_ts(&at)
                ],
            )
            .await?;
        Ok(updated)
    }

    async fn count_unread_chat(&self, client_id: Uuid, reader: Role) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        count(
            &conn,
            "SELECT COUNT(*) FROM chat_messages \
             WHERE client_id = ?1 AND sender_role = ?2 AND read_at IS NULL",
            params![client_id.to_string(), reader.counterpart().as_str()],
        )
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, name FROM clients WHERE status != 'archived' \
                 OR id IN (SELECT client_id FROM chat_messages) \
                 ORDER BY name COLLATE NOCASE",
                (),
            )
            .await?;
        let mut clients = Vec::new();
        while let Some(row) = rows.next().await? {
            clients.push((get_text(&row, 0), get_text(&row, 1)));
        }

        let mut out = Vec::with_capacity(clients.len());
        for (client_id, client_name) in clients {
            let last_message = self.last_chat_message(&conn, &client_id).await?;
            let unread_count = count(
                &conn,
                "SELECT COUNT(*) FROM chat_messages \
                 WHERE client_id = ?1 AND sender_role = 'client' AND read_at IS NULL",
                params![client_id.as_str()],
            )
            .await?;
            out.push(ConversationSummary {
                client_id: parse_uuid(&client_id, "client.id")?,
                client_name,
                last_message,
                unread_count,
            });
        }
        Ok(out)
    }

    async fn delete_chat_message(&self, message_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM chat_messages WHERE id = ?1",
                params![message_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ClientStatus, ClientStore, CreateClientParams};

    async fn seeded() -> (LibSqlBackend, tempfile::TempDir, Uuid) {
        let (db, tmp) = crate::testing::test_libsql().await;
        let client = db
            .create_client(&CreateClientParams {
                name: "Juniper Studio".to_string(),
                company: None,
                email: None,
                phone: None,
                website: None,
                status: ClientStatus::Active,
                notes: None,
            })
            .await
            .expect("client");
        (db, tmp, client.id)
    }

    fn message(client_id: Uuid, role: Role, body: &str) -> CreateChatMessageParams {
        CreateChatMessageParams {
            client_id,
            sender_role: role,
            sender_account_id: None,
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn history_is_oldest_first_with_cursor() {
        let (db, _tmp, client_id) = seeded().await;
        let mut sent = Vec::new();
        for body in ["one", "two", "three", "four"] {
            sent.push(
                db.create_chat_message(&message(client_id, Role::Client, body))
                    .await
                    .expect("send"),
            );
        }

        let latest = db
            .list_chat_messages(
                client_id,
                &ChatHistoryQuery {
                    before: None,
                    limit: 2,
                },
            )
            .await
            .expect("history");
        assert_eq!(
            latest.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["three", "four"]
        );

        let earlier = db
            .list_chat_messages(
                client_id,
                &ChatHistoryQuery {
                    before: Some(latest[0].created_at),
                    limit: 10,
                },
            )
            .await
            .expect("history");
        assert_eq!(
            earlier.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
    }

    #[tokio::test]
    async fn read_receipts_apply_to_the_counterpart_only() {
        let (db, _tmp, client_id) = seeded().await;
        db.create_chat_message(&message(client_id, Role::Client, "hello"))
            .await
            .expect("send");
        db.create_chat_message(&message(client_id, Role::Client, "anyone?"))
            .await
            .expect("send");
        db.create_chat_message(&message(client_id, Role::Admin, "hi there"))
            .await
            .expect("send");

        assert_eq!(db.count_unread_chat(client_id, Role::Admin).await.expect("count"), 2);
        assert_eq!(db.count_unread_chat(client_id, Role::Client).await.expect("count"), 1);

        assert_eq!(
            db.mark_chat_read(client_id, Role::Admin, Utc::now())
                .await
                .expect("mark"),
            2
        );
        assert_eq!(db.count_unread_chat(client_id, Role::Admin).await.expect("count"), 0);
        assert_eq!(db.count_unread_chat(client_id, Role::Client).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn conversations_summarize_each_client() {
        let (db, _tmp, client_id) = seeded().await;
        db.create_chat_message(&message(client_id, Role::Client, "first"))
            .await
            .expect("send");
        let last = db
            .create_chat_message(&message(client_id, Role::Client, "second"))
            .await
            .expect("send");

        let summaries = db.list_conversations().await.expect("summaries");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].client_name, "Juniper Studio");
        assert_eq!(summaries[0].unread_count, 2);
        assert_eq!(
            summaries[0].last_message.as_ref().map(|m| m.id),
            Some(last.id)
        );

        assert!(db.delete_chat_message(last.id).await.expect("delete"));
        assert!(db.get_chat_message(last.id).await.expect("get").is_none());
    }
}
