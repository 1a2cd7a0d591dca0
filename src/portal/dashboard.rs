//! Dashboard assembly for both portals.

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{
    AdminDashboardCounts, AgencyUpdateRecord, ClientDashboardCounts, Database, OfferListFilter,
    RequestListFilter, RequestRecord, TaskListFilter, TaskRecord, TaskSort, WeeklyProductRecord,
};
use crate::error::DatabaseError;
use crate::portal::weekly;

const RECENT_ITEMS: usize = 5;
const LATEST_UPDATES: usize = 3;

#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub counts: AdminDashboardCounts,
    pub recent_requests: Vec<RequestRecord>,
    /// Open tasks, soonest due first.
    pub upcoming_tasks: Vec<TaskRecord>,
}

#[derive(Debug, Serialize)]
pub struct ClientDashboard {
    pub counts: ClientDashboardCounts,
    pub active_offers: usize,
    pub latest_updates: Vec<AgencyUpdateRecord>,
    pub weekly_product: Option<WeeklyProductRecord>,
    pub upcoming_tasks: Vec<TaskRecord>,
}

async fn open_tasks(
    db: &dyn Database,
    client_id: Option<Uuid>,
) -> Result<Vec<TaskRecord>, DatabaseError> {
    let mut tasks = db
        .list_tasks(&TaskListFilter {
            client_id,
            sort: TaskSort::DueDate,
            ..Default::default()
        })
        .await?;
    tasks.retain(|task| task.status.is_open());
    tasks.truncate(RECENT_ITEMS);
    Ok(tasks)
}

pub async fn admin_dashboard(
    db: &dyn Database,
    today: NaiveDate,
) -> Result<AdminDashboard, DatabaseError> {
    let counts = db.admin_dashboard_counts(today).await?;
    let mut recent_requests = db.list_requests(&RequestListFilter::default()).await?;
    recent_requests.truncate(RECENT_ITEMS);
    Ok(AdminDashboard {
        counts,
        recent_requests,
        upcoming_tasks: open_tasks(db, None).await?,
    })
}

pub async fn client_dashboard(
    db: &dyn Database,
    client_id: Uuid,
    today: NaiveDate,
) -> Result<ClientDashboard, DatabaseError> {
    let counts = db.client_dashboard_counts(client_id, today).await?;
    let active_offers = db
        .list_offers(&OfferListFilter {
            available_on: Some(today),
        })
        .await?
        .len();
    let mut latest_updates = db.list_agency_updates(true).await?;
    latest_updates.truncate(LATEST_UPDATES);
    Ok(ClientDashboard {
        counts,
        active_offers,
        latest_updates,
        weekly_product: weekly::featured_product(db, today).await?,
        upcoming_tasks: open_tasks(db, Some(client_id)).await?,
    })
}

#[cfg(all(test, feature = "libsql"))]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::{
        ClientStatus, CreateAgencyUpdateParams, CreateClientParams, CreateTaskParams,
        TaskPriority, TaskStatus,
    };

    #[tokio::test]
    async fn client_dashboard_is_scoped_to_the_client() {
        let (db, _tmp) = crate::testing::test_db().await;
        let today = chrono::Utc::now().date_naive();
        let mut ids = Vec::new();
        for name in ["Mine", "Theirs"] {
            let client = db
                .create_client(&CreateClientParams {
                    name: name.to_string(),
                    company: None,
                    email: None,
                    phone: None,
                    website: None,
                    status: ClientStatus::Active,
                    notes: None,
                })
                .await
                .expect("client");
            ids.push(client.id);
            db.create_task(&CreateTaskParams {
                client_id: client.id,
                title: format!("{name} overdue"),
                description: None,
                status: TaskStatus::Todo,
                priority: TaskPriority::High,
                due_date: Some(today - Duration::days(2)),
            })
            .await
            .expect("task");
        }
        for (title, published) in [("Draft", false), ("Live", true)] {
            db.create_agency_update(&CreateAgencyUpdateParams {
                title: title.to_string(),
                body: "text".to_string(),
                pinned: false,
                published,
            })
            .await
            .expect("update");
        }

        let dashboard = client_dashboard(db.as_ref(), ids[0], today)
            .await
            .expect("dashboard");
        assert_eq!(dashboard.counts.open_tasks, 1);
        assert_eq!(dashboard.counts.overdue_tasks, 1);
        assert_eq!(dashboard.upcoming_tasks.len(), 1);
        assert_eq!(dashboard.upcoming_tasks[0].title, "Mine overdue");
        assert_eq!(dashboard.latest_updates.len(), 1);
        assert_eq!(dashboard.latest_updates[0].title, "Live");
        assert!(dashboard.weekly_product.is_none());

        let admin = admin_dashboard(db.as_ref(), today).await.expect("admin");
        assert_eq!(admin.counts.open_tasks, 2);
        assert_eq!(admin.counts.overdue_tasks, 2);
        assert_eq!(admin.counts.clients_by_status.get("active"), Some(&2));
        assert_eq!(admin.upcoming_tasks.len(), 2);
    }
}
