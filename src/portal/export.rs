//! CSV exports for the admin portal.

use crate::db::{ClientRecord, TaskRecord};

const CLIENT_HEADER: [&str; 9] = [
    "id", "name", "company", "email", "phone", "website", "status", "notes", "created_at",
];

const TASK_HEADER: [&str; 8] = [
    "id",
    "client_id",
    "title",
    "status",
    "priority",
    "due_date",
    "completed_at",
    "created_at",
];

/// Render the client list as CSV with a header row.
pub fn clients_csv(clients: &[ClientRecord]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CLIENT_HEADER)?;
    for client in clients {
        writer.write_record([
            client.id.to_string(),
            client.name.clone(),
            client.company.clone().unwrap_or_default(),
            client.email.clone().unwrap_or_default(),
            client.phone.clone().unwrap_or_default(),
            client.website.clone().unwrap_or_default(),
            client.status.as_str().to_string(),
            client.notes.clone().unwrap_or_default(),
            client.created_at.to_rfc3339(),
        ])?;
    }
    finish(writer)
}

/// Render tasks as CSV with a header row.
pub fn tasks_csv(tasks: &[TaskRecord]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TASK_HEADER)?;
    for task in tasks {
        writer.write_record([
            task.id.to_string(),
            task.client_id.to_string(),
            task.title.clone(),
            task.status.as_str().to_string(),
            task.priority.as_str().to_string(),
            task.due_date.map(|d| d.to_string()).unwrap_or_default(),
            task.completed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            task.created_at.to_rfc3339(),
        ])?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, csv::Error> {
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::db::ClientStatus;

    #[test]
    fn clients_csv_quotes_awkward_fields() {
        let now = Utc::now();
        let client = ClientRecord {
            id: Uuid::nil(),
            name: "Smith, Jones & Co".to_string(),
            name_normalized: "smith jones co".to_string(),
            company: None,
            email: Some("hello@sj.test".to_string()),
            phone: None,
            website: None,
            status: ClientStatus::Lead,
            notes: Some("said \"maybe\"\nfollow up".to_string()),
            created_at: now,
            updated_at: now,
        };
        let csv = clients_csv(&[client]).expect("csv");
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("id,name,company,email,phone,website,status,notes,created_at")
        );
        assert!(csv.contains("\"Smith, Jones & Co\""));
        assert!(csv.contains("\"said \"\"maybe\"\"\nfollow up\""));
        assert!(csv.contains(",lead,"));

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "Smith, Jones & Co");
    }

    #[test]
    fn empty_exports_have_only_a_header() {
        assert_eq!(clients_csv(&[]).expect("csv").lines().count(), 1);
        assert_eq!(tasks_csv(&[]).expect("csv").lines().count(), 1);
    }
}
