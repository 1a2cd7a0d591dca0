//! Agency-published content: resources, offers, updates and weekly products.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use libsql::{Connection, Value, params};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    AgencyUpdateRecord, AgencyUpdateStore, CreateAgencyUpdateParams, CreateOfferParams,
    CreateResourceParams, CreateWeeklyProductParams, OfferListFilter, OfferRecord, OfferStore,
    ResourceListFilter, ResourceRecord, ResourceStore, StoredFileRef, UpdateAgencyUpdateParams,
    UpdateOfferParams, UpdateResourceParams, UpdateWeeklyProductParams, WeeklyProductFilter,
    WeeklyProductLinkParams, WeeklyProductLinkRecord, WeeklyProductRecord, WeeklyProductStore,
    update_published_at, validate_offer_terms, week_start_of,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, bool_value, fmt_date, fmt_ts, get_i64, get_opt_i64, get_opt_text, get_text,
    opt_i64, opt_text, opt_text_owned, parse_date, parse_opt_date, parse_opt_timestamp,
    parse_opt_uuid, parse_timestamp, parse_uuid,
};

const RESOURCE_COLUMNS: &str = "id, title, description, category, url, file_key, file_name, \
                                file_content_type, file_size, client_id, created_at, updated_at";

const OFFER_COLUMNS: &str = "id, title, description, price, discount_percent, valid_from, \
                             valid_until, active, created_at, updated_at";

const UPDATE_COLUMNS: &str =
    "id, title, body, pinned, published, published_at, created_at, updated_at";

const PRODUCT_COLUMNS: &str =
    "id, title, description, image_url, week_start, created_at, updated_at";

fn row_to_resource_record(row: &libsql::Row) -> Result<ResourceRecord, DatabaseError> {
    let file = match get_opt_text(row, 5) {
        Some(key) => Some(StoredFileRef {
            key,
            file_name: get_text(row, 6),
            content_type: get_opt_text(row, 7)
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: get_i64(row, 8),
        }),
        None => None,
    };
    Ok(ResourceRecord {
        id: parse_uuid(&get_text(row, 0), "resource.id")?,
        title: get_text(row, 1),
        description: get_opt_text(row, 2),
        category: get_opt_text(row, 3),
        url: get_opt_text(row, 4),
        file,
        client_id: parse_opt_uuid(get_opt_text(row, 9), "resource.client_id")?,
        created_at: parse_timestamp(&get_text(row, 10))?,
        updated_at: parse_timestamp(&get_text(row, 11))?,
    })
}

fn parse_price(raw: Option<String>) -> Result<Option<Decimal>, DatabaseError> {
    raw.map(|value| {
        Decimal::from_str(&value)
            .map_err(|e| DatabaseError::Serialization(format!("invalid price '{value}': {e}")))
    })
    .transpose()
}

fn row_to_offer_record(row: &libsql::Row) -> Result<OfferRecord, DatabaseError> {
    Ok(OfferRecord {
        id: parse_uuid(&get_text(row, 0), "offer.id")?,
        title: get_text(row, 1),
        description: get_opt_text(row, 2),
        price: parse_price(get_opt_text(row, 3))?,
        discount_percent: get_opt_i64(row, 4)
            .map(i32::try_from)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("invalid discount: {e}")))?,
        valid_from: parse_opt_date(get_opt_text(row, 5))?,
        valid_until: parse_opt_date(get_opt_text(row, 6))?,
        active: get_i64(row, 7) != 0,
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

fn row_to_agency_update(row: &libsql::Row) -> Result<AgencyUpdateRecord, DatabaseError> {
    Ok(AgencyUpdateRecord {
        id: parse_uuid(&get_text(row, 0), "update.id")?,
        title: get_text(row, 1),
        body: get_text(row, 2),
        pinned: get_i64(row, 3) != 0,
        published: get_i64(row, 4) != 0,
        published_at: parse_opt_timestamp(get_opt_text(row, 5))?,
        created_at: parse_timestamp(&get_text(row, 6))?,
        updated_at: parse_timestamp(&get_text(row, 7))?,
    })
}

fn row_to_weekly_product(row: &libsql::Row) -> Result<WeeklyProductRecord, DatabaseError> {
    Ok(WeeklyProductRecord {
        id: parse_uuid(&get_text(row, 0), "weekly_product.id")?,
        title: get_text(row, 1),
        description: get_opt_text(row, 2),
        image_url: get_opt_text(row, 3),
        week_start: parse_date(&get_text(row, 4))?,
        links: Vec::new(),
        created_at: parse_timestamp(&get_text(row, 5))?,
        updated_at: parse_timestamp(&get_text(row, 6))?,
    })
}

fn row_to_weekly_link(row: &libsql::Row) -> Result<WeeklyProductLinkRecord, DatabaseError> {
    Ok(WeeklyProductLinkRecord {
        id: parse_uuid(&get_text(row, 0), "weekly_product_link.id")?,
        product_id: parse_uuid(&get_text(row, 1), "weekly_product_link.product_id")?,
        label: get_text(row, 2),
        url: get_text(row, 3),
        position: i32::try_from(get_i64(row, 4))
            .map_err(|e| DatabaseError::Serialization(format!("invalid link position: {e}")))?,
    })
}

fn file_values(file: Option<&StoredFileRef>) -> [Value; 4] {
    match file {
        Some(file) => [
            Value::Text(file.key.clone()),
            Value::Text(file.file_name.clone()),
            Value::Text(file.content_type.clone()),
            Value::Integer(file.size_bytes),
        ],
        None => [Value::Null, Value::Null, Value::Null, Value::Null],
    }
}

async fn insert_links(
    conn: &Connection,
    product_id: &str,
    links: &[WeeklyProductLinkParams],
) -> Result<(), DatabaseError> {
    for (position, link) in links.iter().enumerate() {
        conn.execute(
            "INSERT INTO weekly_product_links (id, product_id, label, url, position) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                product_id,
                link.label.trim(),
                link.url.trim(),
                position as i64,
            ],
        )
        .await?;
    }
    Ok(())
}

async fn load_links(
    conn: &Connection,
    product: &mut WeeklyProductRecord,
) -> Result<(), DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT id, product_id, label, url, position FROM weekly_product_links \
             WHERE product_id = ?1 ORDER BY position",
            params![product.id.to_string()],
        )
        .await?;
    while let Some(row) = rows.next().await? {
        product.links.push(row_to_weekly_link(&row)?);
    }
    Ok(())
}

// ==================== Resources ====================

#[async_trait]
impl ResourceStore for LibSqlBackend {
    async fn create_resource(
        &self,
        input: &CreateResourceParams,
    ) -> Result<ResourceRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let [file_key, file_name, file_type, file_size] = file_values(input.file.as_ref());
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO resources (id, title, description, category, url, file_key, file_name, file_content_type, file_size, client_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                id.to_string(),
                input.title.trim(),
                opt_text(input.description.as_deref()),
                opt_text(input.category.as_deref()),
                opt_text(input.url.as_deref()),
                file_key,
                file_name,
                file_type,
                file_size,
                opt_text_owned(input.client_id.map(|id| id.to_string())),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_resource(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created resource".to_string()))
    }

    async fn list_resources(
        &self,
        filter: &ResourceListFilter,
    ) -> Result<Vec<ResourceRecord>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(client_id) = filter.visible_to {
            values.push(Value::Text(client_id.to_string()));
            clauses.push(format!("(client_id IS NULL OR client_id = ?{})", values.len()));
        }
        if let Some(category) = filter.category.as_deref() {
            values.push(Value::Text(category.to_string()));
            clauses.push(format!("category = ?{}", values.len()));
        }
        let mut sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_resource_record(&row)?);
        }
        Ok(out)
    }

    async fn get_resource(
        &self,
        resource_id: Uuid,
    ) -> Result<Option<ResourceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?1 LIMIT 1"),
                params![resource_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_resource_record(&row)).transpose()
    }

    async fn update_resource(
        &self,
        resource_id: Uuid,
        input: &UpdateResourceParams,
    ) -> Result<Option<ResourceRecord>, DatabaseError> {
        let Some(existing) = self.get_resource(resource_id).await? else {
            return Ok(None);
        };

        let merged_title = input.title.as_deref().unwrap_or(&existing.title).trim();
        let merged_description = input.description.clone().unwrap_or(existing.description.clone());
        let merged_category = input.category.clone().unwrap_or(existing.category.clone());
        let merged_url = input.url.clone().unwrap_or(existing.url.clone());
        let merged_file = input.file.clone().unwrap_or(existing.file.clone());
        let merged_client = input.client_id.unwrap_or(existing.client_id);
        let [file_key, file_name, file_type, file_size] = file_values(merged_file.as_ref());

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE resources SET \
               title = ?2, description = ?3, category = ?4, url = ?5, \
               file_key = ?6, file_name = ?7, file_content_type = ?8, file_size = ?9, \
               client_id = ?10, updated_at = ?11 \
             WHERE id = ?1",
            params![
                resource_id.to_string(),
                merged_title,
                opt_text_owned(merged_description),
                opt_text_owned(merged_category),
                opt_text_owned(merged_url),
                file_key,
                file_name,
                file_type,
                file_size,
                opt_text_owned(merged_client.map(|id| id.to_string())),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_resource(resource_id).await
    }

    async fn delete_resource(&self, resource_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM resources WHERE id = ?1",
                params![resource_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Offers ====================

#[async_trait]
impl OfferStore for LibSqlBackend {
    async fn create_offer(&self, input: &CreateOfferParams) -> Result<OfferRecord, DatabaseError> {
        validate_offer_terms(
            input.discount_percent,
            input.valid_from,
            input.valid_until,
            input.price,
        )?;

        let id = Uuid::new_v4();
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO offers (id, title, description, price, discount_percent, valid_from, valid_until, active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.to_string(),
                input.title.trim(),
                opt_text(input.description.as_deref()),
                opt_text_owned(input.price.map(|p| p.normalize().to_string())),
                opt_i64(input.discount_percent.map(i64::from)),
                opt_text_owned(input.valid_from.as_ref().map(fmt_date)),
                opt_text_owned(input.valid_until.as_ref().map(fmt_date)),
                bool_value(input.active),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_offer(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created offer".to_string()))
    }

    async fn list_offers(
        &self,
        filter: &OfferListFilter,
    ) -> Result<Vec<OfferRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = match filter.available_on {
            Some(date) => {
                conn.query(
                    &format!(
                        "SELECT {OFFER_COLUMNS} FROM offers \
                         WHERE active = 1 \
                           AND (valid_from IS NULL OR valid_from <= ?1) \
                           AND (valid_until IS NULL OR valid_until >= ?1) \
                         ORDER BY valid_until IS NULL, valid_until ASC, created_at DESC"
                    ),
                    params![fmt_date(&date)],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {OFFER_COLUMNS} FROM offers ORDER BY created_at DESC"),
                    (),
                )
                .await?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_offer_record(&row)?);
        }
        Ok(out)
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<OfferRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = ?1 LIMIT 1"),
                params![offer_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_offer_record(&row)).transpose()
    }

    async fn update_offer(
        &self,
        offer_id: Uuid,
        input: &UpdateOfferParams,
    ) -> Result<Option<OfferRecord>, DatabaseError> {
        let Some(existing) = self.get_offer(offer_id).await? else {
            return Ok(None);
        };

        let merged_title = input.title.as_deref().unwrap_or(&existing.title).trim();
        let merged_description = input.description.clone().unwrap_or(existing.description.clone());
        let merged_price = input.price.unwrap_or(existing.price);
        let merged_discount = input.discount_percent.unwrap_or(existing.discount_percent);
        let merged_from = input.valid_from.unwrap_or(existing.valid_from);
        let merged_until = input.valid_until.unwrap_or(existing.valid_until);
        let merged_active = input.active.unwrap_or(existing.active);
        validate_offer_terms(merged_discount, merged_from, merged_until, merged_price)?;

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE offers SET \
               title = ?2, description = ?3, price = ?4, discount_percent = ?5, \
               valid_from = ?6, valid_until = ?7, active = ?8, updated_at = ?9 \
             WHERE id = ?1",
            params![
                offer_id.to_string(),
                merged_title,
                opt_text_owned(merged_description),
                opt_text_owned(merged_price.map(|p| p.normalize().to_string())),
                opt_i64(merged_discount.map(i64::from)),
                opt_text_owned(merged_from.as_ref().map(fmt_date)),
                opt_text_owned(merged_until.as_ref().map(fmt_date)),
                bool_value(merged_active),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_offer(offer_id).await
    }

    async fn delete_offer(&self, offer_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM offers WHERE id = ?1",
                params![offer_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Updates ====================

#[async_trait]
impl AgencyUpdateStore for LibSqlBackend {
    async fn create_agency_update(
        &self,
        input: &CreateAgencyUpdateParams,
    ) -> Result<AgencyUpdateRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let published_at = update_published_at(None, input.published, now);
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO updates (id, title, body, pinned, published, published_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                input.title.trim(),
                input.body.as_str(),
                bool_value(input.pinned),
                bool_value(input.published),
                opt_text_owned(published_at.as_ref().map(fmt_ts)),
                fmt_ts(&now),
            ],
        )
        .await?;

        self.get_agency_update(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created update".to_string()))
    }

    async fn list_agency_updates(
        &self,
        published_only: bool,
    ) -> Result<Vec<AgencyUpdateRecord>, DatabaseError> {
        let where_sql = if published_only {
            " WHERE published = 1"
        } else {
            ""
        };
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {UPDATE_COLUMNS} FROM updates{where_sql} \
                     ORDER BY pinned DESC, coalesce(published_at, created_at) DESC"
                ),
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_agency_update(&row)?);
        }
        Ok(out)
    }

    async fn get_agency_update(
        &self,
        update_id: Uuid,
    ) -> Result<Option<AgencyUpdateRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {UPDATE_COLUMNS} FROM updates WHERE id = ?1 LIMIT 1"),
                params![update_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_agency_update(&row)).transpose()
    }

    async fn update_agency_update(
        &self,
        update_id: Uuid,
        input: &UpdateAgencyUpdateParams,
    ) -> Result<Option<AgencyUpdateRecord>, DatabaseError> {
        let Some(existing) = self.get_agency_update(update_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let merged_published = input.published.unwrap_or(existing.published);
        let published_at = update_published_at(
            Some((existing.published, existing.published_at)),
            merged_published,
            now,
        );

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE updates SET \
               title = ?2, body = ?3, pinned = ?4, published = ?5, published_at = ?6, updated_at = ?7 \
             WHERE id = ?1",
            params![
                update_id.to_string(),
                input.title.as_deref().unwrap_or(&existing.title).trim(),
                input.body.as_deref().unwrap_or(&existing.body),
                bool_value(input.pinned.unwrap_or(existing.pinned)),
                bool_value(merged_published),
                opt_text_owned(published_at.as_ref().map(fmt_ts)),
                fmt_ts(&now),
            ],
        )
        .await?;

        self.get_agency_update(update_id).await
    }

    async fn delete_agency_update(&self, update_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM updates WHERE id = ?1",
                params![update_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

// ==================== Weekly products ====================

#[async_trait]
impl WeeklyProductStore for LibSqlBackend {
    async fn create_weekly_product(
        &self,
        input: &CreateWeeklyProductParams,
    ) -> Result<WeeklyProductRecord, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO weekly_products (id, title, description, image_url, week_start, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.as_str(),
                input.title.trim(),
                opt_text(input.description.as_deref()),
                opt_text(input.image_url.as_deref()),
                fmt_date(&week_start_of(input.week_start)),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;
        insert_links(&tx, &id, &input.links).await?;
        tx.commit().await?;

        let id = parse_uuid(&id, "weekly_product.id")?;
        self.get_weekly_product(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created weekly product".to_string()))
    }

    async fn list_weekly_products(
        &self,
        filter: &WeeklyProductFilter,
    ) -> Result<Vec<WeeklyProductRecord>, DatabaseError> {
        let mut values: Vec<Value> = Vec::new();
        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM weekly_products");
        if let Some(up_to) = filter.up_to {
            values.push(Value::Text(fmt_date(&up_to)));
            sql.push_str(" WHERE week_start <= ?1");
        }
        sql.push_str(" ORDER BY week_start DESC");
        if let Some(limit) = filter.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let conn = self.connect().await?;
        let mut rows = conn.query(&sql, values).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_weekly_product(&row)?);
        }
        for product in &mut out {
            load_links(&conn, product).await?;
        }
        Ok(out)
    }

    async fn get_weekly_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {PRODUCT_COLUMNS} FROM weekly_products WHERE id = ?1 LIMIT 1"),
                params![product_id.to_string()],
            )
            .await?
            .next()
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut product = row_to_weekly_product(&row)?;
        load_links(&conn, &mut product).await?;
        Ok(Some(product))
    }

    async fn get_weekly_product_for_week(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {PRODUCT_COLUMNS} FROM weekly_products WHERE week_start = ?1 LIMIT 1"
                ),
                params![fmt_date(&week_start_of(week_start))],
            )
            .await?
            .next()
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut product = row_to_weekly_product(&row)?;
        load_links(&conn, &mut product).await?;
        Ok(Some(product))
    }

    async fn update_weekly_product(
        &self,
        product_id: Uuid,
        input: &UpdateWeeklyProductParams,
    ) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
        let Some(existing) = self.get_weekly_product(product_id).await? else {
            return Ok(None);
        };

        let id = product_id.to_string();
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "UPDATE weekly_products SET \
               title = ?2, description = ?3, image_url = ?4, week_start = ?5, updated_at = ?6 \
             WHERE id = ?1",
            params![
                id.as_str(),
                input.title.as_deref().unwrap_or(&existing.title).trim(),
                opt_text_owned(input.description.clone().unwrap_or(existing.description)),
                opt_text_owned(input.image_url.clone().unwrap_or(existing.image_url)),
                fmt_date(&week_start_of(input.week_start.unwrap_or(existing.week_start))),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;
        if let Some(links) = &input.links {
            tx.execute(
                "DELETE FROM weekly_product_links WHERE product_id = ?1",
                params![id.as_str()],
            )
            .await?;
            insert_links(&tx, &id, links).await?;
        }
        tx.commit().await?;

        self.get_weekly_product(product_id).await
    }

    async fn delete_weekly_product(&self, product_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM weekly_products WHERE id = ?1",
                params![product_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}
