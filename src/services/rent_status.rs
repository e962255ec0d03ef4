use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

use crate::services::allocation::vacancies;

/// Dashboard-grade rent state for one allocation. `is_active` requires both a
/// future expiry and a settled payment; an expiry of today counts as expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RentStatus {
    pub days_until_expiry: i64,
    pub is_expired: bool,
    pub is_expiring_soon: bool,
    pub is_active: bool,
}

pub fn days_until_expiry(expiry: NaiveDate, today: NaiveDate) -> i64 {
    (expiry - today).num_days()
}

pub fn classify(expiry: NaiveDate, payment_status: &str, today: NaiveDate) -> RentStatus {
    let days = days_until_expiry(expiry, today);
    RentStatus {
        days_until_expiry: days,
        is_expired: days <= 0,
        is_expiring_soon: days > 0 && days <= 3,
        is_active: days > 0 && payment_status.trim().eq_ignore_ascii_case("paid"),
    }
}

/// Coarser classifier for listings where the payment status is not at hand:
/// anything expiring before today is overdue, everything else is active.
/// Distinct from `classify`: an expiry of today is still "active" here.
pub fn coarse_status(expiry: Option<NaiveDate>, today: NaiveDate) -> &'static str {
    match expiry {
        None => "unknown",
        Some(date) if date < today => "overdue",
        Some(_) => "active",
    }
}

/// Admin dashboard aggregate over the joined tenant listing and the room list.
/// Occupancy is keyed by room id, not the display number, so two rooms that
/// ever share a number cannot collide.
pub fn overview(tenants: &[Value], rooms: &[Value]) -> Value {
    let mut active_rents = 0i64;
    let mut pending_payments = 0i64;
    let mut occupants_by_room: HashMap<String, i64> = HashMap::new();

    for tenant in tenants {
        let Some(allocation) = tenant.get("allocation").filter(|value| value.is_object()) else {
            continue;
        };
        match allocation
            .get("payment_status")
            .and_then(Value::as_str)
            .unwrap_or_default()
        {
            "paid" => active_rents += 1,
            "pending" => pending_payments += 1,
            _ => {}
        }
        let room_id = allocation
            .get("room_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !room_id.is_empty() {
            *occupants_by_room.entry(room_id.to_string()).or_insert(0) += 1;
        }
    }

    let total_vacancies: i64 = rooms
        .iter()
        .map(|room| {
            let room_id = room.get("id").and_then(Value::as_str).unwrap_or_default();
            let capacity = room
                .get("capacity")
                .and_then(Value::as_i64)
                .unwrap_or_default();
            let occupants = occupants_by_room.get(room_id).copied().unwrap_or(0);
            vacancies(capacity, occupants)
        })
        .sum();

    json!({
        "total_tenants": tenants.len() as i64,
        "active_rents": active_rents,
        "pending_payments": pending_payments,
        "total_vacancies": total_vacancies,
    })
}
