use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_admin, require_user, sanitize_user, USERS_TABLE},
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows, update_row},
    routes::overview::OVERVIEW_CACHE_KEY,
    schemas::{
        remove_nulls, serialize_to_map, validate_input, TenantPath, UpdateTenantInput, UserPath,
    },
    services::{
        allocation::{
            assign_room, current_allocation, remove_allocation, update_payment_status,
            ALLOCATIONS_TABLE, ROOMS_TABLE,
        },
        rent_status,
    },
    state::AppState,
};

const USER_ROLES: &[&str] = &["admin", "user"];
const MISSING_ROOM: &str = "N/A";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/admin/tenants", axum::routing::get(list_tenants))
        .route("/admin/tenants/{tenant_id}", axum::routing::put(update_tenant))
        .route(
            "/admin/tenants/allocation/{user_id}",
            axum::routing::get(tenant_allocation),
        )
}

/// Tenant roster with each tenant's allocation embedded, in signup order.
async fn list_tenants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let tenants = fetch_tenant_listing(pool).await?;
    Ok(Json(Value::Array(tenants)))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTenantInput>,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    get_row(pool, USERS_TABLE, &path.tenant_id, "id")
        .await
        .map_err(not_found_as_missing_tenant)?;

    if let Some(profile) = payload.profile_updates.as_ref() {
        let mut record = remove_nulls(serialize_to_map(profile));
        normalize_profile_updates(&mut record)?;
        if !record.is_empty() {
            update_row(pool, USERS_TABLE, &path.tenant_id, &record, "id").await?;
        }
    }

    let change = match payload.allocation_updates.as_ref() {
        None => AllocationChange::Untouched,
        Some(updates) => apply_allocation_updates(pool, &path.tenant_id, updates).await?,
    };

    state.overview_cache.invalidate(OVERVIEW_CACHE_KEY).await;

    let tenant = fetch_tenant_dto(pool, &path.tenant_id).await?;
    tracing::info!(
        tenant_id = %path.tenant_id,
        allocation_change = change.as_str(),
        "Tenant updated"
    );
    Ok(Json(json!({
        "success": true,
        "tenant": tenant,
        "allocation_change": change.as_str(),
    })))
}

/// One tenant's allocation with the room embedded and the expiry flags
/// computed. Tenants can read their own; admins can read anyone's.
async fn tenant_allocation(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let auth = require_user(&state, &headers).await?;
    if !auth.is_admin() && auth.id != path.user_id {
        return Err(AppError::Forbidden(
            "You can only view your own allocation.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let Some(allocation) = current_allocation(pool, &path.user_id).await? else {
        return Ok(Json(json!({ "allocation": Value::Null })));
    };
    let room = lookup_room(pool, &allocation).await?;
    let payload = present_allocation(allocation, room.as_ref(), Utc::now().date_naive());
    Ok(Json(json!({ "allocation": payload })))
}

/// How a tenant update touched the allocation, for the response and the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocationChange {
    Assigned,
    Removed,
    PaymentUpdated,
    Untouched,
}

impl AllocationChange {
    fn as_str(self) -> &'static str {
        match self {
            AllocationChange::Assigned => "assigned",
            AllocationChange::Removed => "removed",
            AllocationChange::PaymentUpdated => "payment_updated",
            AllocationChange::Untouched => "untouched",
        }
    }
}

/// Dispatch on the shape of `allocation_updates`: a room id assigns (with the
/// remaining keys as overrides), an explicit null room id vacates, a bare
/// payment_status repaints the status, anything else is left alone.
async fn apply_allocation_updates(
    pool: &sqlx::PgPool,
    user_id: &str,
    updates: &Map<String, Value>,
) -> AppResult<AllocationChange> {
    match planned_allocation_change(updates) {
        AllocationChange::Removed => {
            let removed = remove_allocation(pool, user_id).await?;
            Ok(if removed {
                AllocationChange::Removed
            } else {
                AllocationChange::Untouched
            })
        }
        AllocationChange::Assigned => {
            let room_id = updates
                .get("room_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    AppError::BadRequest("room_id must be a room id or null.".to_string())
                })?;
            assign_room(pool, user_id, room_id, updates).await?;
            Ok(AllocationChange::Assigned)
        }
        AllocationChange::PaymentUpdated => {
            let status = updates
                .get("payment_status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            update_payment_status(pool, user_id, status).await?;
            Ok(AllocationChange::PaymentUpdated)
        }
        AllocationChange::Untouched => Ok(AllocationChange::Untouched),
    }
}

fn planned_allocation_change(updates: &Map<String, Value>) -> AllocationChange {
    match updates.get("room_id") {
        Some(Value::Null) => AllocationChange::Removed,
        Some(_) => AllocationChange::Assigned,
        None if updates.contains_key("payment_status") => AllocationChange::PaymentUpdated,
        None => AllocationChange::Untouched,
    }
}

/// Loads users, allocations, and rooms once each and joins them in memory.
/// Every user record appears in the roster, admins included, matching the
/// dashboard's tenant count.
pub(crate) async fn fetch_tenant_listing(pool: &sqlx::PgPool) -> AppResult<Vec<Value>> {
    let (tenants, allocations, rooms) = tokio::try_join!(
        list_rows(pool, USERS_TABLE, None, 1000, 0, "created_at", true),
        list_rows(pool, ALLOCATIONS_TABLE, None, 1000, 0, "created_at", true),
        list_rows(pool, ROOMS_TABLE, None, 1000, 0, "room_number", true),
    )?;
    Ok(join_tenants(
        tenants,
        &allocations,
        &rooms,
        Utc::now().date_naive(),
    ))
}

async fn fetch_tenant_dto(pool: &sqlx::PgPool, user_id: &str) -> AppResult<Value> {
    let user = get_row(pool, USERS_TABLE, user_id, "id")
        .await
        .map_err(not_found_as_missing_tenant)?;
    let today = Utc::now().date_naive();
    let allocation = match current_allocation(pool, user_id).await? {
        None => Value::Null,
        Some(allocation) => {
            let room = lookup_room(pool, &allocation).await?;
            decorate_allocation(allocation, room.as_ref(), today)
        }
    };
    let mut dto = sanitize_user(user);
    if let Some(record) = dto.as_object_mut() {
        record.insert("allocation".to_string(), allocation);
    }
    Ok(dto)
}

fn join_tenants(
    tenants: Vec<Value>,
    allocations: &[Value],
    rooms: &[Value],
    today: NaiveDate,
) -> Vec<Value> {
    let rooms_by_id: HashMap<&str, &Value> = rooms
        .iter()
        .filter_map(|room| room.get("id").and_then(Value::as_str).map(|id| (id, room)))
        .collect();
    let allocation_by_user: HashMap<&str, &Value> = allocations
        .iter()
        .filter_map(|allocation| {
            allocation
                .get("user_id")
                .and_then(Value::as_str)
                .map(|id| (id, allocation))
        })
        .collect();

    tenants
        .into_iter()
        .map(|tenant| {
            let user_id = tenant.get("id").and_then(Value::as_str).unwrap_or_default();
            let allocation = match allocation_by_user.get(user_id) {
                Some(allocation) => {
                    let room = allocation
                        .get("room_id")
                        .and_then(Value::as_str)
                        .and_then(|id| rooms_by_id.get(id))
                        .copied();
                    decorate_allocation((*allocation).clone(), room, today)
                }
                None => Value::Null,
            };
            let mut dto = sanitize_user(tenant);
            if let Some(record) = dto.as_object_mut() {
                record.insert("allocation".to_string(), allocation);
            }
            dto
        })
        .collect()
}

/// Listing embed: display fields from the room (sentinel "N/A" when the room
/// row is gone) and the date-only rent status.
fn decorate_allocation(mut allocation: Value, room: Option<&Value>, today: NaiveDate) -> Value {
    let room_number = room_field(room, "room_number");
    let room_type = room_field(room, "room_type");
    let expiry = parse_row_date(&allocation, "rent_expiry_date");
    let status = rent_status::coarse_status(expiry, today);
    if let Some(record) = allocation.as_object_mut() {
        record.insert("room_number".to_string(), Value::String(room_number));
        record.insert("room_type".to_string(), Value::String(room_type));
        record.insert("rent_status".to_string(), Value::String(status.to_string()));
    }
    allocation
}

/// Detail embed: the room as a nested object (or null) plus the expiry flags.
fn present_allocation(mut allocation: Value, room: Option<&Value>, today: NaiveDate) -> Value {
    let expiry = parse_row_date(&allocation, "rent_expiry_date");
    let payment_status = allocation
        .get("payment_status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(record) = allocation.as_object_mut() {
        record.insert(
            "room".to_string(),
            room.map(room_summary).unwrap_or(Value::Null),
        );
        if let Some(expiry) = expiry {
            let flags = rent_status::classify(expiry, &payment_status, today);
            if let Ok(Value::Object(fields)) = serde_json::to_value(flags) {
                record.extend(fields);
            }
        }
    }
    allocation
}

fn room_summary(room: &Value) -> Value {
    json!({
        "id": room.get("id").cloned().unwrap_or(Value::Null),
        "room_number": room.get("room_number").cloned().unwrap_or(Value::Null),
        "room_type": room.get("room_type").cloned().unwrap_or(Value::Null),
        "amenities": room.get("amenities").cloned().unwrap_or_else(|| json!([])),
    })
}

fn room_field(room: Option<&Value>, key: &str) -> String {
    room.and_then(|room| room.get(key))
        .and_then(Value::as_str)
        .unwrap_or(MISSING_ROOM)
        .to_string()
}

fn parse_row_date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok())
}

fn normalize_profile_updates(record: &mut Map<String, Value>) -> AppResult<()> {
    if let Some(email) = record.get("email").and_then(Value::as_str) {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Err(AppError::BadRequest("email cannot be empty.".to_string()));
        }
        record.insert("email".to_string(), Value::String(email));
    }
    if let Some(role) = record.get("role").and_then(Value::as_str) {
        let role = role.trim().to_ascii_lowercase();
        if !USER_ROLES.contains(&role.as_str()) {
            return Err(AppError::BadRequest(
                "role must be one of admin, user.".to_string(),
            ));
        }
        record.insert("role".to_string(), Value::String(role));
    }
    for key in ["full_name", "mobile"] {
        if let Some(text) = record.get(key).and_then(Value::as_str) {
            record.insert(key.to_string(), Value::String(text.trim().to_string()));
        }
    }
    Ok(())
}

async fn lookup_room(pool: &sqlx::PgPool, allocation: &Value) -> AppResult<Option<Value>> {
    let Some(room_id) = allocation.get("room_id").and_then(Value::as_str) else {
        return Ok(None);
    };
    match get_row(pool, ROOMS_TABLE, room_id, "id").await {
        Ok(room) => Ok(Some(room)),
        Err(AppError::NotFound(_)) => Ok(None),
        Err(other) => Err(other),
    }
}

fn not_found_as_missing_tenant(error: AppError) -> AppError {
    match error {
        AppError::NotFound(_) => AppError::NotFound("Tenant not found.".to_string()),
        other => other,
    }
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Map, Value};

    use super::{
        join_tenants, normalize_profile_updates, planned_allocation_change, present_allocation,
        AllocationChange,
    };

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn updates(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn update_dispatch_follows_the_room_id_key() {
        assert_eq!(
            planned_allocation_change(&updates(&[("room_id", json!("r1"))])),
            AllocationChange::Assigned
        );
        assert_eq!(
            planned_allocation_change(&updates(&[("room_id", Value::Null)])),
            AllocationChange::Removed
        );
        assert_eq!(
            planned_allocation_change(&updates(&[("payment_status", json!("paid"))])),
            AllocationChange::PaymentUpdated
        );
        assert_eq!(
            planned_allocation_change(&updates(&[("rent_amount", json!(9000))])),
            AllocationChange::Untouched
        );
    }

    #[test]
    fn listing_join_embeds_allocation_or_null() {
        let today = date(2024, 6, 15);
        let tenants = vec![
            json!({"id": "t1", "email": "a@x.in", "password": "hash", "role": "user"}),
            json!({"id": "t2", "email": "b@x.in", "password": "hash", "role": "user"}),
        ];
        let allocations = vec![json!({
            "id": "al1", "user_id": "t1", "room_id": "r1",
            "rent_expiry_date": "2024-07-01", "payment_status": "paid"
        })];
        let rooms = vec![json!({"id": "r1", "room_number": "101", "room_type": "double"})];

        let joined = join_tenants(tenants, &allocations, &rooms, today);
        assert_eq!(joined.len(), 2);
        assert!(joined[0].get("password").is_none());
        assert_eq!(joined[0]["allocation"]["room_number"], json!("101"));
        assert_eq!(joined[0]["allocation"]["rent_status"], json!("active"));
        assert_eq!(joined[1]["allocation"], Value::Null);
    }

    #[test]
    fn dangling_room_reference_gets_sentinels() {
        let today = date(2024, 6, 15);
        let tenants = vec![json!({"id": "t1", "email": "a@x.in", "role": "user"})];
        let allocations = vec![json!({
            "id": "al1", "user_id": "t1", "room_id": "gone",
            "rent_expiry_date": "2024-06-01", "payment_status": "pending"
        })];
        let joined = join_tenants(tenants, &allocations, &[], today);
        assert_eq!(joined[0]["allocation"]["room_number"], json!("N/A"));
        assert_eq!(joined[0]["allocation"]["room_type"], json!("N/A"));
        assert_eq!(joined[0]["allocation"]["rent_status"], json!("overdue"));
    }

    #[test]
    fn allocation_detail_merges_flags_and_room() {
        let today = date(2024, 6, 15);
        let allocation = json!({
            "id": "al1", "user_id": "t1", "room_id": "r1",
            "rent_expiry_date": "2024-06-17", "payment_status": "paid"
        });
        let room = json!({
            "id": "r1", "room_number": "101", "room_type": "double",
            "amenities": ["wifi"], "monthly_rent": 9000.0
        });
        let detail = present_allocation(allocation, Some(&room), today);
        assert_eq!(detail["room"]["room_number"], json!("101"));
        assert!(detail["room"].get("monthly_rent").is_none());
        assert_eq!(detail["days_until_expiry"], json!(2));
        assert_eq!(detail["is_expiring_soon"], json!(true));
        assert_eq!(detail["is_expired"], json!(false));

        let vacated = present_allocation(
            json!({"id": "al2", "rent_expiry_date": "bad-date"}),
            None,
            today,
        );
        assert_eq!(vacated["room"], Value::Null);
        assert!(vacated.get("days_until_expiry").is_none());
    }

    #[test]
    fn profile_updates_are_normalized_and_role_checked() {
        let mut record = updates(&[
            ("email", json!("  Tenant@PGNest.IN ")),
            ("full_name", json!("  Asha Rao ")),
            ("role", json!("ADMIN")),
        ]);
        normalize_profile_updates(&mut record).unwrap();
        assert_eq!(record["email"], json!("tenant@pgnest.in"));
        assert_eq!(record["full_name"], json!("Asha Rao"));
        assert_eq!(record["role"], json!("admin"));

        let mut bad = updates(&[("role", json!("owner"))]);
        assert!(normalize_profile_updates(&mut bad).is_err());
    }
}
