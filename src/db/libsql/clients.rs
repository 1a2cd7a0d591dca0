use async_trait::async_trait;
use chrono::Utc;
use libsql::{Value, params};
use uuid::Uuid;

use crate::db::{
    ClientListFilter, ClientRecord, ClientStatus, ClientStore, CreateClientParams,
    CreateTaskParams, TaskListFilter, TaskPriority, TaskRecord, TaskStatus, TaskStore,
    UpdateClientParams, UpdateTaskParams, normalize_client_name, task_completed_at,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_opt_text, get_text, opt_text, opt_text_owned,
    parse_opt_date, parse_opt_timestamp, parse_timestamp, parse_uuid,
};

const CLIENT_COLUMNS: &str = "id, name, name_normalized, company, email, phone, website, status, \
                              notes, created_at, updated_at";

const TASK_COLUMNS: &str = "id, client_id, title, description, status, priority, due_date, \
                            completed_at, created_at, updated_at";

fn parse_client_status(raw: &str) -> Result<ClientStatus, DatabaseError> {
    ClientStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid client status '{}'", raw)))
}

fn parse_task_status(raw: &str) -> Result<TaskStatus, DatabaseError> {
    TaskStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid task status '{}'", raw)))
}

fn parse_task_priority(raw: &str) -> Result<TaskPriority, DatabaseError> {
    TaskPriority::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid task priority '{}'", raw)))
}

fn row_to_client_record(row: &libsql::Row) -> Result<ClientRecord, DatabaseError> {
    Ok(ClientRecord {
        id: parse_uuid(&get_text(row, 0), "client.id")?,
        name: get_text(row, 1),
        name_normalized: get_text(row, 2),
        company: get_opt_text(row, 3),
        email: get_opt_text(row, 4),
        phone: get_opt_text(row, 5),
        website: get_opt_text(row, 6),
        status: parse_client_status(&get_text(row, 7))?,
        notes: get_opt_text(row, 8),
        created_at: parse_timestamp(&get_text(row, 9))?,
        updated_at: parse_timestamp(&get_text(row, 10))?,
    })
}

fn row_to_task_record(row: &libsql::Row) -> Result<TaskRecord, DatabaseError> {
    Ok(TaskRecord {
        id: parse_uuid(&get_text(row, 0), "task.id")?,
        client_id: parse_uuid(&get_text(row, 1), "task.client_id")?,
        title: get_text(row, 2),
        description: get_opt_text(row, 3),
        status: parse_task_status(&get_text(row, 4))?,
        priority: parse_task_priority(&get_text(row, 5))?,
        due_date: parse_opt_date(get_opt_text(row, 6))?,
        completed_at: parse_opt_timestamp(get_opt_text(row, 7))?,
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

fn require_client_name(raw: &str) -> Result<String, DatabaseError> {
    let normalized = normalize_client_name(raw);
    if normalized.is_empty() {
        return Err(DatabaseError::Constraint(
            "client name cannot be empty".to_string(),
        ));
    }
    Ok(normalized)
}

#[async_trait]
impl ClientStore for LibSqlBackend {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let normalized_name = require_client_name(&input.name)?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());

        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO clients (id, name, name_normalized, company, email, phone, website, status, notes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id.to_string(),
                input.name.trim(),
                normalized_name.as_str(),
                opt_text(input.company.as_deref()),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.website.as_deref()),
                input.status.as_str(),
                opt_text(input.notes.as_deref()),
                now,
            ],
        )
        .await?;

        self.get_client(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created client".to_string()))
    }

    async fn list_clients(
        &self,
        filter: &ClientListFilter,
    ) -> Result<Vec<ClientRecord>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(search) = filter
            .query
            .as_deref()
            .map(normalize_client_name)
            .filter(|search| !search.is_empty())
        {
            values.push(Value::Text(format!("%{search}%")));
            clauses.push(format!(
                "(name_normalized LIKE ?{n} OR lower(coalesce(company, '')) LIKE ?{n} \
                 OR lower(coalesce(email, '')) LIKE ?{n})",
                n = values.len()
            ));
        }
        if let Some(status) = filter.status {
            values.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients{where_sql} ORDER BY name COLLATE NOCASE ASC"),
                values,
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_client_record(&row)?);
        }
        Ok(out)
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1 LIMIT 1"),
                params![client_id.to_string()],
            )
            .await?
            .next()
            .await?;

        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let Some(existing) = self.get_client(client_id).await? else {
            return Ok(None);
        };

        let merged_name = input
            .name
            .as_deref()
            .unwrap_or(existing.name.as_str())
            .trim();
        let normalized_name = require_client_name(merged_name)?;
        let merged_company = input.company.clone().unwrap_or(existing.company);
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_phone = input.phone.clone().unwrap_or(existing.phone);
        let merged_website = input.website.clone().unwrap_or(existing.website);
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE clients SET \
               name = ?2, \
               name_normalized = ?3, \
               company = ?4, \
               email = ?5, \
               phone = ?6, \
               website = ?7, \
               status = ?8, \
               notes = ?9, \
               updated_at = ?10 \
             WHERE id = ?1",
            params![
                client_id.to_string(),
                merged_name,
                normalized_name.as_str(),
                opt_text_owned(merged_company),
                opt_text_owned(merged_email),
                opt_text_owned(merged_phone),
                opt_text_owned(merged_website),
                merged_status.as_str(),
                opt_text_owned(merged_notes),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_client(client_id).await
    }

    async fn delete_client(&self, client_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM clients WHERE id = ?1",
                params![client_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl TaskStore for LibSqlBackend {
    async fn create_task(&self, input: &CreateTaskParams) -> Result<TaskRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let completed_at = task_completed_at(None, input.status, now);

        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO tasks (id, client_id, title, description, status, priority, due_date, completed_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.to_string(),
                input.client_id.to_string(),
                input.title.trim(),
                opt_text(input.description.as_deref()),
                input.status.as_str(),
                input.priority.as_str(),
                opt_text_owned(input.due_date.as_ref().map(fmt_date)),
                opt_text_owned(completed_at.as_ref().map(fmt_ts)),
                fmt_ts(&now),
            ],
        )
        .await?;

        self.get_task(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created task".to_string()))
    }

    async fn list_tasks(&self, filter: &TaskListFilter) -> Result<Vec<TaskRecord>, DatabaseError> {
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
        if let Some(priority) = filter.priority {
            values.push(Value::Text(priority.as_str().to_string()));
            clauses.push(format!("priority = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(filter.sort.order_by_sql());
        if let Some(limit) = filter.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_task_record(&row)?);
        }
        Ok(out)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 LIMIT 1"),
                params![task_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_task_record(&row)).transpose()
    }

    async fn update_task(
        &self,
        task_id: Uuid,
        input: &UpdateTaskParams,
    ) -> Result<Option<TaskRecord>, DatabaseError> {
        let Some(existing) = self.get_task(task_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let merged_title = input
            .title
            .as_deref()
            .unwrap_or(existing.title.as_str())
            .trim();
        let merged_description = input
            .description
            .clone()
            .unwrap_or(existing.description.clone());
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_priority = input.priority.unwrap_or(existing.priority);
        let merged_due_date = input.due_date.unwrap_or(existing.due_date);
        let completed_at = task_completed_at(
            Some((existing.status, existing.completed_at)),
            merged_status,
            now,
        );

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE tasks SET \
               title = ?2, \
               description = ?3, \
               status = ?4, \
               priority = ?5, \
               due_date = ?6, \
               completed_at = ?7, \
               updated_at = ?8 \
             WHERE id = ?1",
            params![
                task_id.to_string(),
                merged_title,
                opt_text_owned(merged_description),
                merged_status.as_str(),
                merged_priority.as_str(),
                opt_text_owned(merged_due_date.as_ref().map(fmt_date)),
                opt_text_owned(completed_at.as_ref().map(fmt_ts)),
                fmt_ts(&now),
            ],
        )
        .await?;

        self.get_task(task_id).await
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM tasks WHERE id = ?1",
                params![task_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::TaskSort;

    fn client_params(name: &str) -> CreateClientParams {
        CreateClientParams {
            name: name.to_string(),
            company: Some("Harbor Holdings".to_string()),
            email: Some("ops@harbor.test".to_string()),
            phone: None,
            website: None,
            status: ClientStatus::Lead,
            notes: None,
        }
    }

    fn task_params(client_id: Uuid, title: &str) -> CreateTaskParams {
        CreateTaskParams {
            client_id,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
        }
    }

    #[tokio::test]
    async fn client_names_are_unique_after_normalization() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        db.create_client(&client_params("Harbor Coffee"))
            .await
            .expect("create");

        let err = db
            .create_client(&client_params("  harbor   COFFEE!"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let err = db
            .create_client(&client_params("..."))
            .await
            .expect_err("empty name");
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn list_clients_filters_by_query_and_status() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let harbor = db
            .create_client(&client_params("Harbor Coffee"))
            .await
            .expect("create");
        db.create_client(&CreateClientParams {
            status: ClientStatus::Active,
            company: None,
            email: None,
            ..client_params("Alpine Outfitters")
        })
        .await
        .expect("create");

        let all = db
            .list_clients(&ClientListFilter::default())
            .await
            .expect("list");
        assert_eq!(
            all.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpine Outfitters", "Harbor Coffee"]
        );

        let searched = db
            .list_clients(&ClientListFilter {
                query: Some("HARBOR".to_string()),
                status: None,
            })
            .await
            .expect("search");
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].id, harbor.id);

        let active = db
            .list_clients(&ClientListFilter {
                query: None,
                status: Some(ClientStatus::Active),
            })
            .await
            .expect("status");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Alpine Outfitters");
    }

    #[tokio::test]
    async fn update_client_clears_nullable_fields() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let client = db
            .create_client(&client_params("Harbor Coffee"))
            .await
            .expect("create");

        let updated = db
            .update_client(
                client.id,
                &UpdateClientParams {
                    company: Some(None),
                    status: Some(ClientStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(updated.company, None);
        assert_eq!(updated.email.as_deref(), Some("ops@harbor.test"));
        assert_eq!(updated.status, ClientStatus::Active);

        assert!(
            db.update_client(Uuid::new_v4(), &UpdateClientParams::default())
                .await
                .expect("missing")
                .is_none()
        );
    }

    #[tokio::test]
    async fn task_completion_is_stamped_and_cleared() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let client = db
            .create_client(&client_params("Harbor Coffee"))
            .await
            .expect("client");
        let task = db
            .create_task(&task_params(client.id, "Menu redesign"))
            .await
            .expect("task");
        assert!(task.completed_at.is_none());

        let done = db
            .update_task(
                task.id,
                &UpdateTaskParams {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        let stamp = done.completed_at.expect("completed_at set");

        let retitled = db
            .update_task(
                task.id,
                &UpdateTaskParams {
                    title: Some("Menu redesign v2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert_eq!(retitled.completed_at, Some(stamp));

        let reopened = db
            .update_task(
                task.id,
                &UpdateTaskParams {
                    status: Some(TaskStatus::InProgress),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("exists");
        assert!(reopened.completed_at.is_none());
    }

    #[tokio::test]
    async fn list_tasks_sorts_and_filters() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let client = db
            .create_client(&client_params("Harbor Coffee"))
            .await
            .expect("client");
        let other = db
            .create_client(&client_params("Alpine Outfitters"))
            .await
            .expect("client");
        let d = |day| NaiveDate::from_ymd_opt(2026, 7, day).expect("date");

        for (title, due, priority) in [
            ("undated", None, TaskPriority::Urgent),
            ("later", Some(d(20)), TaskPriority::Low),
            ("sooner", Some(d(5)), TaskPriority::High),
        ] {
            db.create_task(&CreateTaskParams {
                due_date: due,
                priority,
                ..task_params(client.id, title)
            })
            .await
            .expect("task");
        }
        db.create_task(&task_params(other.id, "elsewhere"))
            .await
            .expect("task");

        let by_due = db
            .list_tasks(&TaskListFilter {
                client_id: Some(client.id),
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(
            by_due.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["sooner", "later", "undated"]
        );

        let by_priority = db
            .list_tasks(&TaskListFilter {
                client_id: Some(client.id),
                sort: TaskSort::Priority,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(
            by_priority.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["undated", "sooner"]
        );

        let urgent = db
            .list_tasks(&TaskListFilter {
                priority: Some(TaskPriority::Urgent),
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(urgent.len(), 1);
    }

    #[tokio::test]
    async fn tasks_require_an_existing_client_and_cascade() {
        let (db, _tmp) = crate::testing::test_libsql().await;
        let err = db
            .create_task(&task_params(Uuid::new_v4(), "orphan"))
            .await
            .expect_err("foreign key");
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let client = db
            .create_client(&client_params("Harbor Coffee"))
            .await
            .expect("client");
        let task = db
            .create_task(&task_params(client.id, "Signage"))
            .await
            .expect("task");
        assert!(db.delete_client(client.id).await.expect("delete"));
        assert!(db.get_task(task.id).await.expect("get").is_none());
    }
}
