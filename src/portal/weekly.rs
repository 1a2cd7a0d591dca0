//! Weekly product scheduling.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{
    Database, WeeklyProductFilter, WeeklyProductLinkParams, WeeklyProductRecord, week_start_of,
};
use crate::error::{DatabaseError, ValidationError};
use crate::portal::validate;

pub const MAX_LINKS: usize = 10;

/// Link as submitted by the admin form.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkInput {
    pub label: String,
    pub url: String,
}

/// Monday of the week containing `today`.
pub fn current_week_start(today: NaiveDate) -> NaiveDate {
    week_start_of(today)
}

/// Validate submitted links, keeping their order.
pub fn parse_links(links: Vec<LinkInput>) -> Result<Vec<WeeklyProductLinkParams>, ValidationError> {
    if links.len() > MAX_LINKS {
        return Err(ValidationError::new(
            "links",
            format!("at most {MAX_LINKS} links per product"),
        ));
    }
    links
        .into_iter()
        .map(|link| {
            Ok(WeeklyProductLinkParams {
                label: validate::require_text("links.label", &link.label, 80)?,
                url: validate::validate_url("links.url", &link.url)?,
            })
        })
        .collect()
}

/// Product featured for the week containing `today`.
///
/// Falls back to the most recent past week when the current week has no
/// product, so the portal never shows an empty slot after a missed week.
pub async fn featured_product(
    db: &dyn Database,
    today: NaiveDate,
) -> Result<Option<WeeklyProductRecord>, DatabaseError> {
    let week = current_week_start(today);
    if let Some(product) = db.get_weekly_product_for_week(week).await? {
        return Ok(Some(product));
    }
    Ok(db
        .list_weekly_products(&WeeklyProductFilter {
            up_to: Some(week),
            limit: Some(1),
        })
        .await?
        .into_iter()
        .next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateWeeklyProductParams;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn product(title: &str, week: NaiveDate) -> CreateWeeklyProductParams {
        CreateWeeklyProductParams {
            title: title.to_string(),
            description: None,
            image_url: None,
            week_start: week,
            links: Vec::new(),
        }
    }

    #[test]
    fn links_are_validated_in_order() {
        let parsed = parse_links(vec![
            LinkInput {
                label: " Shop ".to_string(),
                url: "https://shop.test/item".to_string(),
            },
            LinkInput {
                label: "Docs".to_string(),
                url: "https://docs.test".to_string(),
            },
        ])
        .expect("valid");
        assert_eq!(parsed[0].label, "Shop");
        assert_eq!(parsed[1].label, "Docs");

        let bad = parse_links(vec![LinkInput {
            label: "x".to_string(),
            url: "nope".to_string(),
        }]);
        assert!(bad.is_err());

        let too_many = (0..=MAX_LINKS)
            .map(|i| LinkInput {
                label: format!("l{i}"),
                url: "https://a.test".to_string(),
            })
            .collect();
        assert!(parse_links(too_many).is_err());
    }

    #[cfg(feature = "libsql")]
    #[tokio::test]
    async fn featured_prefers_current_week_then_latest_past() {
        let (db, _tmp) = crate::testing::test_db().await;
        let thursday = date(2026, 4, 16);

        assert!(featured_product(db.as_ref(), thursday).await.expect("none").is_none());

        db.create_weekly_product(&product("Past", date(2026, 4, 1)))
            .await
            .expect("past");
        db.create_weekly_product(&product("Future", date(2026, 4, 22)))
            .await
            .expect("future");
        let featured = featured_product(db.as_ref(), thursday)
            .await
            .expect("lookup")
            .expect("fallback");
        assert_eq!(featured.title, "Past");

        db.create_weekly_product(&product("Current", date(2026, 4, 14)))
            .await
            .expect("current");
        let featured = featured_product(db.as_ref(), thursday)
            .await
            .expect("lookup")
            .expect("current");
        assert_eq!(featured.title, "Current");
        assert_eq!(featured.week_start, date(2026, 4, 13));
    }
}
