use chrono::{Months, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::repository::table_service;

pub const ROOMS_TABLE: &str = "rooms";
pub const ALLOCATIONS_TABLE: &str = "allocations";

pub const PAYMENT_STATUSES: &[&str] = &["paid", "pending", "overdue"];

/// Fully resolved allocation fields, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAllocation {
    pub rent_amount: f64,
    pub rent_start_date: NaiveDate,
    pub rent_expiry_date: NaiveDate,
    pub payment_status: String,
}

/// Applies the defaulting chain for an assignment/transfer: explicit override,
/// then the room's configured rent, "today" for the start date, one calendar
/// month after the start for the expiry, and the prior allocation's payment
/// status (falling back to "pending") for the status.
pub fn resolve_allocation(
    overrides: &Map<String, Value>,
    room_monthly_rent: f64,
    prior_status: Option<&str>,
    today: NaiveDate,
) -> AppResult<ResolvedAllocation> {
    let rent_amount = match read_amount(overrides, "rent_amount")? {
        Some(amount) => amount,
        None => room_monthly_rent,
    };
    if rent_amount <= 0.0 {
        return Err(AppError::BadRequest(
            "rent_amount must be a positive number.".to_string(),
        ));
    }

    let rent_start_date = read_date(overrides, "rent_start_date")?.unwrap_or(today);
    let rent_expiry_date = match read_date(overrides, "rent_expiry_date")? {
        Some(date) => date,
        None => add_one_month(rent_start_date),
    };
    if rent_expiry_date <= rent_start_date {
        return Err(AppError::UnprocessableEntity(
            "rent_expiry_date must be after rent_start_date.".to_string(),
        ));
    }

    let payment_status = match read_text(overrides, "payment_status") {
        Some(raw) => normalize_payment_status(&raw)?,
        None => prior_status
            .map(str::trim)
            .filter(|status| !status.is_empty())
            .unwrap_or("pending")
            .to_string(),
    };

    Ok(ResolvedAllocation {
        rent_amount,
        rent_start_date,
        rent_expiry_date,
        payment_status,
    })
}

/// Same day next month, clamped to the last day when the target month is
/// shorter (Jan 31 -> Feb 28/29).
pub fn add_one_month(date: NaiveDate) -> NaiveDate {
    date.checked_add_months(Months::new(1)).unwrap_or(date)
}

pub fn normalize_payment_status(raw: &str) -> AppResult<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if PAYMENT_STATUSES.contains(&normalized.as_str()) {
        return Ok(normalized);
    }
    Err(AppError::BadRequest(
        "payment_status must be one of paid, pending, overdue.".to_string(),
    ))
}

/// Rejects an assignment that would overfill the room. A tenant already in the
/// room may be re-assigned to it freely (the upsert replaces their own row).
pub fn ensure_capacity(capacity: i64, occupants: i64, already_in_room: bool) -> AppResult<()> {
    if already_in_room || occupants < capacity {
        return Ok(());
    }
    Err(AppError::Conflict("Room is at full capacity.".to_string()))
}

pub fn vacancies(capacity: i64, occupancy: i64) -> i64 {
    (capacity - occupancy).max(0)
}

/// The tenant's live allocation, if any. Reads the most recent row as a
/// defensive measure; the write path keeps at most one row per tenant.
pub async fn current_allocation(
    pool: &sqlx::PgPool,
    user_id: &str,
) -> AppResult<Option<Value>> {
    let mut filters = Map::new();
    filters.insert("user_id".to_string(), Value::String(user_id.to_string()));
    let mut rows = table_service::list_rows(
        pool,
        ALLOCATIONS_TABLE,
        Some(&filters),
        1,
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(rows.pop())
}

pub async fn count_occupants(pool: &sqlx::PgPool, room_id: &str) -> AppResult<i64> {
    let mut filters = Map::new();
    filters.insert("room_id".to_string(), Value::String(room_id.to_string()));
    table_service::count_rows(pool, ALLOCATIONS_TABLE, Some(&filters)).await
}

/// Binds a tenant to a room, replacing any existing binding in one upsert so a
/// transfer can never leave two live rows or none. Capacity is checked before
/// the write.
pub async fn assign_room(
    pool: &sqlx::PgPool,
    user_id: &str,
    room_id: &str,
    overrides: &Map<String, Value>,
) -> AppResult<Value> {
    let room = table_service::get_row(pool, ROOMS_TABLE, room_id, "id")
        .await
        .map_err(|error| match error {
            AppError::NotFound(_) => AppError::NotFound("Room not found.".to_string()),
            other => other,
        })?;
    let tenant = table_service::get_row(pool, crate::auth::USERS_TABLE, user_id, "id")
        .await
        .map_err(|error| match error {
            AppError::NotFound(_) => AppError::NotFound("Tenant not found.".to_string()),
            other => other,
        })?;

    let prior = current_allocation(pool, user_id).await?;
    let prior_room_id = prior
        .as_ref()
        .map(|allocation| value_str(allocation, "room_id"))
        .unwrap_or_default();
    let already_in_room = prior_room_id == value_str(&room, "id");

    let capacity = value_i64(&room, "capacity").unwrap_or(1);
    let occupants = count_occupants(pool, room_id).await?;
    ensure_capacity(capacity, occupants, already_in_room)?;

    let prior_status = prior
        .as_ref()
        .map(|allocation| value_str(allocation, "payment_status"))
        .filter(|status| !status.is_empty());
    let monthly_rent = value_f64(&room, "monthly_rent").unwrap_or(0.0);
    let resolved = resolve_allocation(
        overrides,
        monthly_rent,
        prior_status.as_deref(),
        Utc::now().date_naive(),
    )?;

    let mut payload = Map::new();
    payload.insert("user_id".to_string(), Value::String(user_id.to_string()));
    payload.insert("room_id".to_string(), Value::String(room_id.to_string()));
    payload.insert("rent_amount".to_string(), Value::from(resolved.rent_amount));
    payload.insert(
        "rent_start_date".to_string(),
        Value::String(resolved.rent_start_date.format("%Y-%m-%d").to_string()),
    );
    payload.insert(
        "rent_expiry_date".to_string(),
        Value::String(resolved.rent_expiry_date.format("%Y-%m-%d").to_string()),
    );
    payload.insert(
        "payment_status".to_string(),
        Value::String(resolved.payment_status.clone()),
    );

    let allocation = table_service::upsert_row(pool, ALLOCATIONS_TABLE, &payload, "user_id").await?;

    tracing::info!(
        user_id = %user_id,
        room_id = %room_id,
        room_number = %value_str(&room, "room_number"),
        tenant_email = %value_str(&tenant, "email"),
        transferred = !prior_room_id.is_empty() && !already_in_room,
        "Room assigned to tenant"
    );
    Ok(allocation)
}

/// Removes the tenant's allocation if one exists. Calling it for an
/// unallocated tenant is a successful no-op.
pub async fn remove_allocation(pool: &sqlx::PgPool, user_id: &str) -> AppResult<bool> {
    match table_service::delete_row(pool, ALLOCATIONS_TABLE, user_id, "user_id").await {
        Ok(removed) => {
            tracing::info!(
                user_id = %user_id,
                room_id = %value_str(&removed, "room_id"),
                "Allocation removed"
            );
            Ok(true)
        }
        Err(AppError::NotFound(_)) => Ok(false),
        Err(other) => Err(other),
    }
}

/// Payment-status-only mutation; the room binding is untouched. Fails when the
/// tenant has no allocation to update.
pub async fn update_payment_status(
    pool: &sqlx::PgPool,
    user_id: &str,
    raw_status: &str,
) -> AppResult<Value> {
    let status = normalize_payment_status(raw_status)?;
    let allocation = current_allocation(pool, user_id)
        .await?
        .ok_or_else(|| AppError::BadRequest("No allocation exists for this tenant.".to_string()))?;
    let allocation_id = value_str(&allocation, "id");

    let mut patch = Map::new();
    patch.insert("payment_status".to_string(), Value::String(status.clone()));
    let updated = table_service::update_row(pool, ALLOCATIONS_TABLE, &allocation_id, &patch, "id")
        .await?;

    tracing::info!(user_id = %user_id, payment_status = %status, "Payment status updated");
    Ok(updated)
}

fn read_text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn read_date(map: &Map<String, Value>, key: &str) -> AppResult<Option<NaiveDate>> {
    let Some(value) = map.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let text = value.as_str().map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("Invalid {key}; expected YYYY-MM-DD.")))
}

fn read_amount(map: &Map<String, Value>, key: &str) -> AppResult<Option<f64>> {
    let Some(value) = map.get(key) else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(number.as_f64()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("{key} must be a positive number.")))
        }
        _ => Err(AppError::BadRequest(format!(
            "{key} must be a positive number."
        ))),
    }
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn value_i64(row: &Value, key: &str) -> Option<i64> {
    row.as_object().and_then(|obj| obj.get(key)).and_then(|value| match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    })
}

fn value_f64(row: &Value, key: &str) -> Option<f64> {
    row.as_object().and_then(|obj| obj.get(key)).and_then(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Map, Value};

    use super::{
        add_one_month, ensure_capacity, normalize_payment_status, resolve_allocation, vacancies,
    };

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn overrides(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn defaults_dates_amount_and_status() {
        let resolved =
            resolve_allocation(&Map::new(), 12000.0, None, date(2024, 1, 1)).unwrap();
        assert_eq!(resolved.rent_amount, 12000.0);
        assert_eq!(resolved.rent_start_date, date(2024, 1, 1));
        assert_eq!(resolved.rent_expiry_date, date(2024, 2, 1));
        assert_eq!(resolved.payment_status, "pending");
    }

    #[test]
    fn expiry_clamps_to_short_months() {
        assert_eq!(add_one_month(date(2024, 1, 31)), date(2024, 2, 29));
        assert_eq!(add_one_month(date(2025, 1, 31)), date(2025, 2, 28));
        assert_eq!(add_one_month(date(2024, 3, 31)), date(2024, 4, 30));
        assert_eq!(add_one_month(date(2024, 12, 15)), date(2025, 1, 15));
    }

    #[test]
    fn explicit_overrides_win() {
        let map = overrides(&[
            ("rent_amount", json!(9500)),
            ("rent_start_date", json!("2024-03-05")),
            ("rent_expiry_date", json!("2024-05-05")),
            ("payment_status", json!("Paid")),
        ]);
        let resolved = resolve_allocation(&map, 12000.0, Some("pending"), date(2024, 1, 1))
            .unwrap();
        assert_eq!(resolved.rent_amount, 9500.0);
        assert_eq!(resolved.rent_start_date, date(2024, 3, 5));
        assert_eq!(resolved.rent_expiry_date, date(2024, 5, 5));
        assert_eq!(resolved.payment_status, "paid");
    }

    #[test]
    fn status_falls_back_to_prior_then_pending() {
        let resolved =
            resolve_allocation(&Map::new(), 8000.0, Some("overdue"), date(2024, 6, 1)).unwrap();
        assert_eq!(resolved.payment_status, "overdue");

        let resolved = resolve_allocation(&Map::new(), 8000.0, None, date(2024, 6, 1)).unwrap();
        assert_eq!(resolved.payment_status, "pending");
    }

    #[test]
    fn rejects_expiry_on_or_before_start() {
        let map = overrides(&[
            ("rent_start_date", json!("2024-03-05")),
            ("rent_expiry_date", json!("2024-03-05")),
        ]);
        assert!(resolve_allocation(&map, 8000.0, None, date(2024, 1, 1)).is_err());

        let map = overrides(&[
            ("rent_start_date", json!("2024-03-05")),
            ("rent_expiry_date", json!("2024-02-01")),
        ]);
        assert!(resolve_allocation(&map, 8000.0, None, date(2024, 1, 1)).is_err());
    }

    #[test]
    fn rejects_malformed_dates_and_amounts() {
        let map = overrides(&[("rent_start_date", json!("05-03-2024"))]);
        assert!(resolve_allocation(&map, 8000.0, None, date(2024, 1, 1)).is_err());

        let map = overrides(&[("rent_amount", json!("lots"))]);
        assert!(resolve_allocation(&map, 8000.0, None, date(2024, 1, 1)).is_err());

        let map = overrides(&[("rent_amount", json!(-10))]);
        assert!(resolve_allocation(&map, 8000.0, None, date(2024, 1, 1)).is_err());
    }

    #[test]
    fn null_overrides_behave_like_absent_ones() {
        let map = overrides(&[
            ("rent_amount", Value::Null),
            ("rent_start_date", Value::Null),
        ]);
        let resolved = resolve_allocation(&map, 7000.0, None, date(2024, 1, 10)).unwrap();
        assert_eq!(resolved.rent_amount, 7000.0);
        assert_eq!(resolved.rent_start_date, date(2024, 1, 10));
    }

    #[test]
    fn accepts_known_payment_statuses_only() {
        assert_eq!(normalize_payment_status(" Paid ").unwrap(), "paid");
        assert_eq!(normalize_payment_status("OVERDUE").unwrap(), "overdue");
        assert!(normalize_payment_status("settled").is_err());
        assert!(normalize_payment_status("").is_err());
    }

    #[test]
    fn capacity_check_allows_reassignment_to_own_room() {
        assert!(ensure_capacity(1, 0, false).is_ok());
        assert!(ensure_capacity(1, 1, false).is_err());
        assert!(ensure_capacity(1, 1, true).is_ok());
        assert!(ensure_capacity(2, 1, false).is_ok());
        assert!(ensure_capacity(2, 3, true).is_ok());
    }

    #[test]
    fn vacancies_never_go_negative() {
        assert_eq!(vacancies(3, 1), 2);
        assert_eq!(vacancies(1, 0), 1);
        assert_eq!(vacancies(1, 1), 0);
        assert_eq!(vacancies(1, 2), 0);
    }
}
