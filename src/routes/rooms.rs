use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_admin, require_user},
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    routes::overview::OVERVIEW_CACHE_KEY,
    schemas::{
        remove_nulls, serialize_to_map, validate_input, CreateRoomInput, RoomPath, UpdateRoomInput,
    },
    services::allocation::{count_occupants, vacancies, ALLOCATIONS_TABLE, ROOMS_TABLE},
    state::AppState,
};

const ROOM_TYPES: &[&str] = &["single", "double", "triple"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/rooms", axum::routing::get(list_rooms).post(create_room))
        .route(
            "/rooms/{room_id}",
            axum::routing::put(update_room).delete(delete_room),
        )
}

async fn list_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (rooms, allocations) = tokio::try_join!(
        list_rows(pool, ROOMS_TABLE, None, 1000, 0, "room_number", true),
        list_rows(pool, ALLOCATIONS_TABLE, None, 1000, 0, "created_at", true),
    )?;
    let occupancy = occupancy_by_room(&allocations);

    Ok(Json(Value::Array(attach_occupancy(rooms, &occupancy))))
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoomInput>,
) -> AppResult<impl IntoResponse> {
    require_admin(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    normalize_room_payload_for_write(&mut record, true)?;

    let room_number = value_str_key(&record, "room_number");
    ensure_room_number_free(pool, &room_number, None).await?;

    let created = create_row(pool, ROOMS_TABLE, &record).await?;
    state.overview_cache.invalidate(OVERVIEW_CACHE_KEY).await;

    tracing::info!(room_number = %room_number, "Room created");
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRoomInput>,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let existing = get_row(pool, ROOMS_TABLE, &path.room_id, "id").await?;
    let mut record = remove_nulls(serialize_to_map(&payload));
    if record.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    normalize_room_payload_for_write(&mut record, false)?;

    let current_number = existing
        .get("room_number")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let new_number = value_str_key(&record, "room_number");
    if !new_number.is_empty() && new_number != current_number {
        ensure_room_number_free(pool, &new_number, Some(&path.room_id)).await?;
    }

    // A capacity cut below live occupancy would leave the room over-full.
    if let Some(new_capacity) = record.get("capacity").and_then(Value::as_i64) {
        let occupants = count_occupants(pool, &path.room_id).await?;
        if new_capacity < occupants {
            return Err(AppError::Conflict(format!(
                "Capacity cannot be below current occupancy ({occupants})."
            )));
        }
    }

    let updated = update_row(pool, ROOMS_TABLE, &path.room_id, &record, "id").await?;
    state.overview_cache.invalidate(OVERVIEW_CACHE_KEY).await;

    let occupants = count_occupants(pool, &path.room_id).await?;
    tracing::info!(room_id = %path.room_id, "Room updated");
    Ok(Json(with_occupancy(updated, occupants)))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let pool = db_pool(&state)?;

    get_row(pool, ROOMS_TABLE, &path.room_id, "id").await?;
    let occupants = count_occupants(pool, &path.room_id).await?;
    if occupants > 0 {
        return Err(AppError::Conflict(format!(
            "Room has {occupants} occupant(s) and cannot be deleted."
        )));
    }

    delete_row(pool, ROOMS_TABLE, &path.room_id, "id").await?;
    state.overview_cache.invalidate(OVERVIEW_CACHE_KEY).await;

    tracing::info!(room_id = %path.room_id, "Room deleted");
    Ok(Json(json!({ "success": true })))
}

async fn ensure_room_number_free(
    pool: &sqlx::PgPool,
    room_number: &str,
    exclude_room_id: Option<&str>,
) -> AppResult<()> {
    let mut filters = Map::new();
    filters.insert(
        "room_number".to_string(),
        Value::String(room_number.to_string()),
    );
    let matches = list_rows(pool, ROOMS_TABLE, Some(&filters), 5, 0, "created_at", true).await?;
    let taken = matches.iter().any(|room| {
        let id = room.get("id").and_then(Value::as_str).unwrap_or_default();
        exclude_room_id != Some(id)
    });
    if taken {
        return Err(AppError::Conflict(
            "A room with this number already exists.".to_string(),
        ));
    }
    Ok(())
}

fn normalize_room_payload_for_write(
    record: &mut Map<String, Value>,
    default_capacity_from_type: bool,
) -> AppResult<()> {
    if let Some(number) = record.get("room_number").and_then(Value::as_str) {
        record.insert(
            "room_number".to_string(),
            Value::String(number.trim().to_string()),
        );
    }

    if let Some(room_type) = record.get("room_type").and_then(Value::as_str) {
        let normalized = room_type.trim().to_ascii_lowercase();
        if !ROOM_TYPES.contains(&normalized.as_str()) {
            return Err(AppError::BadRequest(
                "room_type must be one of single, double, triple.".to_string(),
            ));
        }
        // On create, capacity follows the type convention unless given
        // explicitly. Updates never touch capacity behind the admin's back.
        if default_capacity_from_type && !record.contains_key("capacity") {
            record.insert(
                "capacity".to_string(),
                Value::from(default_capacity_for_type(&normalized)),
            );
        }
        record.insert("room_type".to_string(), Value::String(normalized));
    }

    if let Some(amenities) = record.get("amenities").and_then(Value::as_array) {
        let cleaned = amenities
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Value::String(value.to_string()))
            .collect::<Vec<_>>();
        record.insert("amenities".to_string(), Value::Array(cleaned));
    }

    Ok(())
}

fn default_capacity_for_type(room_type: &str) -> i64 {
    match room_type {
        "double" => 2,
        "triple" => 3,
        _ => 1,
    }
}

fn occupancy_by_room(allocations: &[Value]) -> HashMap<String, i64> {
    let mut counts = HashMap::new();
    for allocation in allocations {
        let room_id = allocation
            .get("room_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !room_id.is_empty() {
            *counts.entry(room_id.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

fn attach_occupancy(rooms: Vec<Value>, occupancy: &HashMap<String, i64>) -> Vec<Value> {
    rooms
        .into_iter()
        .map(|room| {
            let occupants = room
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| occupancy.get(id))
                .copied()
                .unwrap_or(0);
            with_occupancy(room, occupants)
        })
        .collect()
}

fn with_occupancy(mut room: Value, occupants: i64) -> Value {
    let capacity = room
        .get("capacity")
        .and_then(Value::as_i64)
        .unwrap_or_default();
    if let Some(record) = room.as_object_mut() {
        record.insert("occupancy".to_string(), Value::from(occupants));
        record.insert(
            "vacancies".to_string(),
            Value::from(vacancies(capacity, occupants)),
        );
    }
    room
}

fn value_str_key(record: &Map<String, Value>, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        attach_occupancy, default_capacity_for_type, normalize_room_payload_for_write,
        occupancy_by_room, with_occupancy,
    };

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn normalizes_room_type_and_defaults_capacity_on_create() {
        let mut payload = record(&[
            ("room_number", json!(" 101 ")),
            ("room_type", json!(" Double ")),
        ]);
        normalize_room_payload_for_write(&mut payload, true).unwrap();
        assert_eq!(payload["room_number"], json!("101"));
        assert_eq!(payload["room_type"], json!("double"));
        assert_eq!(payload["capacity"], json!(2));
    }

    #[test]
    fn explicit_capacity_is_not_overwritten() {
        let mut payload = record(&[("room_type", json!("triple")), ("capacity", json!(2))]);
        normalize_room_payload_for_write(&mut payload, true).unwrap();
        assert_eq!(payload["capacity"], json!(2));
    }

    #[test]
    fn type_change_on_update_leaves_capacity_alone() {
        let mut payload = record(&[("room_type", json!("double"))]);
        normalize_room_payload_for_write(&mut payload, false).unwrap();
        assert!(payload.get("capacity").is_none());
    }

    #[test]
    fn rejects_unknown_room_types() {
        let mut payload = record(&[("room_type", json!("penthouse"))]);
        assert!(normalize_room_payload_for_write(&mut payload, true).is_err());
    }

    #[test]
    fn cleans_amenity_lists_preserving_order() {
        let mut payload = record(&[("amenities", json!([" wifi ", "", "geyser", "  "]))]);
        normalize_room_payload_for_write(&mut payload, true).unwrap();
        assert_eq!(payload["amenities"], json!(["wifi", "geyser"]));
    }

    #[test]
    fn capacity_convention_matches_room_types() {
        assert_eq!(default_capacity_for_type("single"), 1);
        assert_eq!(default_capacity_for_type("double"), 2);
        assert_eq!(default_capacity_for_type("triple"), 3);
    }

    #[test]
    fn counts_occupancy_per_room() {
        let allocations = vec![
            json!({"room_id": "a"}),
            json!({"room_id": "a"}),
            json!({"room_id": "b"}),
            json!({"room_id": null}),
        ];
        let counts = occupancy_by_room(&allocations);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn attaches_occupancy_and_floored_vacancies() {
        let occupancy = occupancy_by_room(&[json!({"room_id": "a"}), json!({"room_id": "a"})]);
        let rooms = attach_occupancy(
            vec![
                json!({"id": "a", "capacity": 1}),
                json!({"id": "b", "capacity": 3}),
            ],
            &occupancy,
        );
        assert_eq!(rooms[0]["occupancy"], json!(2));
        assert_eq!(rooms[0]["vacancies"], json!(0));
        assert_eq!(rooms[1]["occupancy"], json!(0));
        assert_eq!(rooms[1]["vacancies"], json!(3));

        let single = with_occupancy(json!({"id": "c", "capacity": 2}), 1);
        assert_eq!(single["vacancies"], json!(1));
    }
}
