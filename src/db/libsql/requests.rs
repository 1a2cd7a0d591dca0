use async_trait::async_trait;
use chrono::Utc;
use libsql::{Value, params};
use uuid::Uuid;

use crate::db::{
    CreateRequestParams, RequestKind, RequestListFilter, RequestRecord, RequestStatus,
    RequestStore, UpdateRequestParams, resolve_request_transition,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_ts, get_opt_text, get_text, opt_text_owned, parse_opt_timestamp,
    parse_opt_uuid, parse_timestamp, parse_uuid,
};

const REQUEST_COLUMNS: &str = "id, client_id, kind, subject, body, offer_id, status, \
                               admin_response, resolved_at, created_at, updated_at";

fn row_to_request_record(row: &libsql::Row) -> Result<RequestRecord, DatabaseError> {
    let kind_raw = get_text(row, 2);
    let status_raw = get_text(row, 6);
    Ok(RequestRecord {
        id: parse_uuid(&get_text(row, 0), "request.id")?,
        client_id: parse_uuid(&get_text(row, 1), "request.client_id")?,
        kind: RequestKind::from_db_value(&kind_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid request kind '{}'", kind_raw))
        })?,
        subject: get_text(row, 3),
        body: get_text(row, 4),
        offer_id: parse_opt_uuid(get_opt_text(row, 5), "request.offer_id")?,
        status: RequestStatus::from_db_value(&status_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid request status '{}'", status_raw))
        })?,
        admin_response: get_opt_text(row, 7),
        resolved_at: parse_opt_timestamp(get_opt_text(row, 8))?,
        created_at: parse_timestamp(&get_text(row, 9))?,
        updated_at: parse_timestamp(&get_text(row, 10))?,
    })
}

#[async_trait]
impl RequestStore for LibSqlBackend {
    async fn create_request(
        &self,
        input: &CreateRequestParams,
    ) -> Result<RequestRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO requests (id, client_id, kind, subject, body, offer_id, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            params![
                id.to_string(),
                input.client_id.to_string(),
                input.kind.as_str(),
                input.subject.trim(),
                input.body.as_str(),
                opt_text_owned(input.offer_id.map(|id| id.to_string())),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_request(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created request".to_string()))
    }

    async fn list_requests(
        &self,
        filter: &RequestListFilter,
    ) -> Result<Vec<RequestRecord>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(client_id) = filter.client_id {
            values.push(Value::Text(client_id.to_string()));
            clauses.push(format!("client_id = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        let mut sql = format!("SELECT {REQUEST_COLUMNS} FROM requests");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_request_record(&row)?);
        }
        Ok(out)
    }

    async fn get_request(&self, request_id: Uuid) -> Result<Option<RequestRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1 LIMIT 1"),
                params![request_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_request_record(&row)).transpose()
    }

    async fn update_request(
        &self,
        request_id: Uuid,
        input: &UpdateRequestParams,
    ) -> Result<Option<RequestRecord>, DatabaseError> {
        let Some(existing) = self.get_request(request_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let (status, resolved_at) = resolve_request_transition(&existing, input.status, now)?;
        let admin_response = input
            .admin_response
            .clone()
            .unwrap_or(existing.admin_response.clone());

        let conn = self.connect().await?;
        // Guard on the status we read so a concurrent transition is not overwritten.
        let updated = conn
            .execute(
                "UPDATE requests SET status = ?3, admin_response = ?4, resolved_at = ?5, updated_at = ?6 \
                 WHERE id = ?1 AND status = ?2",
                params![
                    request_id.to_string(),
                    existing.status.as_str(),
                    status.as_str(),
                    opt_text_owned(admin_response),
                    opt_text_owned(resolved_at.as_ref().map(fmt_ts)),
                    fmt_ts(&now),
                ],
            )
            .await?;
        if updated == 0 {
            return Err(DatabaseError::Constraint(
                "request status changed concurrently; reload and retry".to_string(),
            ));
        }

        self.get_request(request_id).await
    }

    async fn delete_request(&self, request_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM requests WHERE id = ?1",
                params![request_id.to_string()],
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
                name: "Riverside Vets".to_string(),
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

    fn request(client_id: Uuid) -> CreateRequestParams {
        CreateRequestParams {
            client_id,
            kind: RequestKind::Support,
            subject: "Broken contact form".to_string(),
            body: "Submissions go nowhere since Friday.".to_string(),
            offer_id: None,
        }
    }

    #[tokio::test]
    async fn requests_start_pending_and_follow_transitions() {
        let (db, _tmp, client_id) = seeded().await;
        let created = db.create_request(&request(client_id)).await.expect("create");
        assert_eq!(created.status, RequestStatus::Pending);
        assert!(created.resolved_at.is_none());

        let reviewing = db
            .update_request(
                created.id,
                &UpdateRequestParams {
                    status: Some(RequestStatus::InReview),
                    admin_response: Some(Some("Looking into it".to_string())),
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(reviewing.status, RequestStatus::InReview);
        assert_eq!(reviewing.admin_response.as_deref(), Some("Looking into it"));

        let err = db
            .update_request(
                created.id,
                &UpdateRequestParams {
                    status: Some(RequestStatus::Completed),
                    admin_response: None,
                },
            )
            .await
            .expect_err("in_review cannot complete");
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let rejected = db
            .update_request(
                created.id,
                &UpdateRequestParams {
                    status: Some(RequestStatus::Rejected),
                    admin_response: None,
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert!(rejected.resolved_at.is_some());
        assert_eq!(rejected.admin_response.as_deref(), Some("Looking into it"));

        let err = db
            .update_request(
                created.id,
                &UpdateRequestParams {
                    status: Some(RequestStatus::Pending),
                    admin_response: None,
                },
            )
            .await
            .expect_err("terminal");
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn list_requests_filters() {
        let (db, _tmp, client_id) = seeded().await;
        let first = db.create_request(&request(client_id)).await.expect("create");
        db.create_request(&request(client_id)).await.expect("create");
        db.update_request(
            first.id,
            &UpdateRequestParams {
                status: Some(RequestStatus::Cancelled),
                admin_response: None,
            },
        )
        .await
        .expect("cancel");

        let pending = db
            .list_requests(&RequestListFilter {
                client_id: Some(client_id),
                status: Some(RequestStatus::Pending),
            })
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(
            db.list_requests(&RequestListFilter::default())
                .await
                .expect("all")
                .len(),
            2
        );
        assert!(
            db.list_requests(&RequestListFilter {
                client_id: Some(Uuid::new_v4()),
                status: None,
            })
            .await
            .expect("other client")
            .is_empty()
        );
    }
}
