//! Client request rules on top of the status transition table.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::{Database, RequestKind, RequestRecord, RequestStatus};
use crate::error::{DatabaseError, ValidationError};

/// Why a client-side request action was refused.
#[derive(Debug, thiserror::Error)]
pub enum RequestActionError {
    #[error("request not found")]
    NotFound,
    #[error("request can no longer be cancelled (status {0})")]
    NotCancellable(&'static str),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Check that `request` belongs to `client_id` and may still be cancelled.
///
/// Requests of other clients report `NotFound` so their existence is not
/// revealed.
pub fn ensure_client_may_cancel(
    request: &RequestRecord,
    client_id: Uuid,
) -> Result<(), RequestActionError> {
    if request.client_id != client_id {
        return Err(RequestActionError::NotFound);
    }
    if !request.status.is_cancellable() {
        return Err(RequestActionError::NotCancellable(request.status.as_str()));
    }
    Ok(())
}

/// Statuses an admin may move `current` to.
pub fn next_statuses(current: RequestStatus) -> Vec<RequestStatus> {
    use RequestStatus::*;
    [Pending, InReview, Approved, Rejected, Completed, Cancelled]
        .into_iter()
        .filter(|next| current.can_transition_to(*next))
        .collect()
}

/// Validate the kind / offer pairing of a new request.
///
/// Offer requests must name an offer that is available today; other kinds
/// must not name one.
pub async fn check_offer_reference(
    db: &dyn Database,
    kind: RequestKind,
    offer_id: Option<Uuid>,
    today: NaiveDate,
) -> Result<(), RequestActionError> {
    match (kind, offer_id) {
        (RequestKind::Offer, None) => Err(ValidationError::new(
            "offer_id",
            "offer requests must reference an offer",
        )
        .into()),
        (RequestKind::Offer, Some(offer_id)) => {
            let available = db
                .get_offer(offer_id)
                .await?
                .is_some_and(|offer| offer.is_available_on(today));
            if available {
                Ok(())
            } else {
                Err(ValidationError::new("offer_id", "offer is not available").into())
            }
        }
        (_, Some(_)) => Err(ValidationError::new(
            "offer_id",
            "only offer requests may reference an offer",
        )
        .into()),
        (_, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::CreateOfferParams;

    fn request(client_id: Uuid, status: RequestStatus) -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            id: Uuid::new_v4(),
            client_id,
            kind: RequestKind::General,
            subject: "Help".to_string(),
            body: "Please".to_string(),
            offer_id: None,
            status,
            admin_response: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn clients_cancel_only_their_open_requests() {
        let me = Uuid::new_v4();
        assert!(ensure_client_may_cancel(&request(me, RequestStatus::Pending), me).is_ok());
        assert!(ensure_client_may_cancel(&request(me, RequestStatus::InReview), me).is_ok());
        assert!(matches!(
            ensure_client_may_cancel(&request(me, RequestStatus::Approved), me),
            Err(RequestActionError::NotCancellable("approved"))
        ));
        assert!(matches!(
            ensure_client_may_cancel(&request(Uuid::new_v4(), RequestStatus::Pending), me),
            Err(RequestActionError::NotFound)
        ));
    }

    #[test]
    fn next_status_table() {
        use RequestStatus::*;
        assert_eq!(next_statuses(Pending), vec![InReview, Approved, Rejected, Cancelled]);
        assert_eq!(next_statuses(InReview), vec![Approved, Rejected, Cancelled]);
        assert_eq!(next_statuses(Approved), vec![Completed]);
        assert!(next_statuses(Completed).is_empty());
    }

    #[cfg(feature = "libsql")]
    #[tokio::test]
    async fn offer_references_are_checked() {
        let (db, _tmp) = crate::testing::test_db().await;
        let today = Utc::now().date_naive();
        let offer = db
            .create_offer(&CreateOfferParams {
                title: "Audit".to_string(),
                description: None,
                price: None,
                discount_percent: Some(10),
                valid_from: None,
                valid_until: None,
                active: true,
            })
            .await
            .expect("offer");
        let inactive = db
            .create_offer(&CreateOfferParams {
                title: "Old".to_string(),
                description: None,
                price: None,
                discount_percent: None,
                valid_from: None,
                valid_until: None,
                active: false,
            })
            .await
            .expect("offer");

        assert!(
            check_offer_reference(db.as_ref(), RequestKind::Offer, Some(offer.id), today)
                .await
                .is_ok()
        );
        assert!(
            check_offer_reference(db.as_ref(), RequestKind::Offer, Some(inactive.id), today)
                .await
                .is_err()
        );
        assert!(
            check_offer_reference(db.as_ref(), RequestKind::Offer, None, today)
                .await
                .is_err()
        );
        assert!(
            check_offer_reference(db.as_ref(), RequestKind::Support, Some(offer.id), today)
                .await
                .is_err()
        );
        assert!(
            check_offer_reference(db.as_ref(), RequestKind::General, None, today)
                .await
                .is_ok()
        );
    }
}
