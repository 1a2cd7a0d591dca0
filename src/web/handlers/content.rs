//! Agency content shared with every client: offers, updates and the weekly
//! product.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::auth::Principal;
use crate::db::{
    AgencyUpdateRecord, CreateAgencyUpdateParams, CreateOfferParams, CreateWeeklyProductParams,
    OfferListFilter, OfferRecord, UpdateAgencyUpdateParams, UpdateOfferParams,
    UpdateWeeklyProductParams, WeeklyProductFilter, WeeklyProductRecord, validate_offer_terms,
};
use crate::portal::{validate, weekly};
use crate::web::handlers::{ApiError, audit_admin, db_error, invalid, not_found, publish, today};
use crate::web::server::AppState;
use crate::web::sse::{ChangeAction, ChangeTable};
use crate::web::types::*;

fn title(raw: &str) -> Result<String, ApiError> {
    validate::require_text("title", raw, validate::MAX_TITLE_CHARS).map_err(invalid)
}

fn description(value: Option<String>) -> Result<Option<String>, ApiError> {
    validate::optional_text("description", value, validate::MAX_TEXT_CHARS).map_err(invalid)
}

// --- Offers ---

pub async fn offers_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OfferListQuery>,
) -> Result<Json<Vec<OfferRecord>>, ApiError> {
    let filter = OfferListFilter {
        available_on: query.available.then(today),
    };
    let offers = state
        .db
        .list_offers(&filter)
        .await
        .map_err(|e| db_error("List offers", e))?;
    Ok(Json(offers))
}

pub async fn offers_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<OfferCreateRequest>,
) -> Result<(StatusCode, Json<OfferRecord>), ApiError> {
    let params = CreateOfferParams {
        title: title(&body.title)?,
        description: description(body.description)?,
        price: body.price,
        discount_percent: body.discount_percent,
        valid_from: body.valid_from,
        valid_until: body.valid_until,
        active: body.active.unwrap_or(true),
    };
    validate_offer_terms(
        params.discount_percent,
        params.valid_from,
        params.valid_until,
        params.price,
    )
    .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let offer = state
        .db
        .create_offer(&params)
        .await
        .map_err(|e| db_error("Create offer", e))?;
    publish(&state, ChangeTable::Offers, ChangeAction::Insert, offer.id, None);
    audit_admin(&principal, "offer.created", serde_json::json!({ "offer_id": offer.id }));
    Ok((StatusCode::CREATED, Json(offer)))
}

pub async fn offers_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OfferRecord>, ApiError> {
    state
        .db
        .get_offer(id)
        .await
        .map_err(|e| db_error("Load offer", e))?
        .map(Json)
        .ok_or_else(|| not_found("Offer"))
}

/// The merged terms are re-checked by the store, so a window that only
/// becomes inverted after the patch is refused with 409.
pub async fn offers_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<OfferPatchRequest>,
) -> Result<Json<OfferRecord>, ApiError> {
    let params = UpdateOfferParams {
        title: body.title.as_deref().map(title).transpose()?,
        description: body.description.map(description).transpose()?,
        price: body.price,
        discount_percent: body.discount_percent,
        valid_from: body.valid_from,
        valid_until: body.valid_until,
        active: body.active,
    };
    let offer = state
        .db
        .update_offer(id, &params)
        .await
        .map_err(|e| db_error("Update offer", e))?
        .ok_or_else(|| not_found("Offer"))?;
    publish(&state, ChangeTable::Offers, ChangeAction::Update, id, None);
    audit_admin(&principal, "offer.updated", serde_json::json!({ "offer_id": id }));
    Ok(Json(offer))
}

pub async fn offers_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state
        .db
        .delete_offer(id)
        .await
        .map_err(|e| db_error("Delete offer", e))?
    {
        return Err(not_found("Offer"));
    }
    publish(&state, ChangeTable::Offers, ChangeAction::Delete, id, None);
    audit_admin(&principal, "offer.deleted", serde_json::json!({ "offer_id": id }));
    Ok(StatusCode::NO_CONTENT)
}

/// Offers a client can act on today.
pub async fn portal_offers_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OfferRecord>>, ApiError> {
    let offers = state
        .db
        .list_offers(&OfferListFilter {
            available_on: Some(today()),
        })
        .await
        .map_err(|e| db_error("List offers", e))?;
    Ok(Json(offers))
}

// --- Agency updates ---

pub async fn updates_list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgencyUpdateRecord>>, ApiError> {
    let updates = state
        .db
        .list_agency_updates(false)
        .await
        .map_err(|e| db_error("List updates", e))?;
    Ok(Json(updates))
}

pub async fn updates_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<UpdateCreateRequest>,
) -> Result<(StatusCode, Json<AgencyUpdateRecord>), ApiError> {
    let params = CreateAgencyUpdateParams {
        title: title(&body.title)?,
        body: validate::require_text("body", &body.body, validate::MAX_TEXT_CHARS)
            .map_err(invalid)?,
        pinned: body.pinned,
        published: body.published,
    };
    let update = state
        .db
        .create_agency_update(&params)
        .await
        .map_err(|e| db_error("Create update", e))?;
    publish(&state, ChangeTable::AgencyUpdates, ChangeAction::Insert, update.id, None);
    audit_admin(
        &principal,
        "update.created",
        serde_json::json!({ "update_id": update.id, "published": update.published }),
    );
    Ok((StatusCode::CREATED, Json(update)))
}

pub async fn updates_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgencyUpdateRecord>, ApiError> {
    state
        .db
        .get_agency_update(id)
        .await
        .map_err(|e| db_error("Load update", e))?
        .map(Json)
        .ok_or_else(|| not_found("Update"))
}

pub async fn updates_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePatchRequest>,
) -> Result<Json<AgencyUpdateRecord>, ApiError> {
    let params = UpdateAgencyUpdateParams {
        title: body.title.as_deref().map(title).transpose()?,
        body: body
            .body
            .map(|b| validate::require_text("body", &b, validate::MAX_TEXT_CHARS))
            .transpose()
            .map_err(invalid)?,
        pinned: body.pinned,
        published: body.published,
    };
    let update = state
        .db
        .update_agency_update(id, &params)
        .await
        .map_err(|e| db_error("Update update", e))?
        .ok_or_else(|| not_found("Update"))?;
    publish(&state, ChangeTable::AgencyUpdates, ChangeAction::Update, id, None);
    audit_admin(
        &principal,
        "update.updated",
        serde_json::json!({ "update_id": id, "published": update.published }),
    );
    Ok(Json(update))
}

pub async fn updates_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state
        .db
        .delete_agency_update(id)
        .await
        .map_err(|e| db_error("Delete update", e))?
    {
        return Err(not_found("Update"));
    }
    publish(&state, ChangeTable::AgencyUpdates, ChangeAction::Delete, id, None);
    audit_admin(&principal, "update.deleted", serde_json::json!({ "update_id": id }));
    Ok(StatusCode::NO_CONTENT)
}

/// Published updates, pinned first.
pub async fn portal_updates_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgencyUpdateRecord>>, ApiError> {
    let updates = state
        .db
        .list_agency_updates(true)
        .await
        .map_err(|e| db_error("List updates", e))?;
    Ok(Json(updates))
}

// --- Weekly products ---

pub async fn weekly_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeeklyListQuery>,
) -> Result<Json<Vec<WeeklyProductRecord>>, ApiError> {
    let products = state
        .db
        .list_weekly_products(&WeeklyProductFilter {
            up_to: None,
            limit: query.limit.map(|l| l.min(state.portal.page_size_limit)),
        })
        .await
        .map_err(|e| db_error("List weekly products", e))?;
    Ok(Json(products))
}

pub async fn weekly_create_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<WeeklyCreateRequest>,
) -> Result<(StatusCode, Json<WeeklyProductRecord>), ApiError> {
    let params = CreateWeeklyProductParams {
        title: title(&body.title)?,
        description: description(body.description)?,
        image_url: validate::optional_url("image_url", body.image_url).map_err(invalid)?,
        week_start: body.week_start,
        links: weekly::parse_links(body.links).map_err(invalid)?,
    };
    let product = state
        .db
        .create_weekly_product(&params)
        .await
        .map_err(|e| db_error("Create weekly product", e))?;
    publish(&state, ChangeTable::WeeklyProducts, ChangeAction::Insert, product.id, None);
    audit_admin(
        &principal,
        "weekly_product.created",
        serde_json::json!({ "product_id": product.id, "week_start": product.week_start }),
    );
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn weekly_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WeeklyProductRecord>, ApiError> {
    state
        .db
        .get_weekly_product(id)
        .await
        .map_err(|e| db_error("Load weekly product", e))?
        .map(Json)
        .ok_or_else(|| not_found("Weekly product"))
}

pub async fn weekly_update_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<WeeklyPatchRequest>,
) -> Result<Json<WeeklyProductRecord>, ApiError> {
    let params = UpdateWeeklyProductParams {
        title: body.title.as_deref().map(title).transpose()?,
        description: body.description.map(description).transpose()?,
        image_url: body
            .image_url
            .map(|u| validate::optional_url("image_url", u))
            .transpose()
            .map_err(invalid)?,
        week_start: body.week_start,
        links: body
            .links
            .map(weekly::parse_links)
            .transpose()
            .map_err(invalid)?,
    };
    let product = state
        .db
        .update_weekly_product(id, &params)
        .await
        .map_err(|e| db_error("Update weekly product", e))?
        .ok_or_else(|| not_found("Weekly product"))?;
    publish(&state, ChangeTable::WeeklyProducts, ChangeAction::Update, id, None);
    audit_admin(
        &principal,
        "weekly_product.updated",
        serde_json::json!({ "product_id": id }),
    );
    Ok(Json(product))
}

pub async fn weekly_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state
        .db
        .delete_weekly_product(id)
        .await
        .map_err(|e| db_error("Delete weekly product", e))?
    {
        return Err(not_found("Weekly product"));
    }
    publish(&state, ChangeTable::WeeklyProducts, ChangeAction::Delete, id, None);
    audit_admin(
        &principal,
        "weekly_product.deleted",
        serde_json::json!({ "product_id": id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// This week's product and earlier ones. Future weeks stay hidden.
pub async fn portal_weekly_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeeklyListQuery>,
) -> Result<Json<WeeklyPortalResponse>, ApiError> {
    let today = today();
    let featured = weekly::featured_product(state.db.as_ref(), today)
        .await
        .map_err(|e| db_error("Load weekly product", e))?;
    let previous = state
        .db
        .list_weekly_products(&WeeklyProductFilter {
            up_to: Some(weekly::current_week_start(today)),
            limit: Some(query.limit.unwrap_or(10).min(state.portal.page_size_limit)),
        })
        .await
        .map_err(|e| db_error("List weekly products", e))?
        .into_iter()
        .filter(|p| featured.as_ref().is_none_or(|f| f.id != p.id))
        .collect();
    Ok(Json(WeeklyPortalResponse { featured, previous }))
}
