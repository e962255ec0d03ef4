use serde::Deserialize;
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_amenities() -> Vec<String> {
    Vec::new()
}
fn default_limit_100() -> i64 {
    100
}
fn default_offset_0() -> i64 {
    0
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RegisterInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[validate(length(max = 120))]
    pub full_name: Option<String>,
    #[validate(length(max = 20))]
    pub mobile: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateRoomInput {
    #[validate(length(min = 1, max = 20))]
    pub room_number: String,
    pub room_type: String,
    #[validate(range(min = 1.0))]
    pub monthly_rent: f64,
    /// Defaults from the room type (single=1, double=2, triple=3) when absent.
    #[validate(range(min = 1))]
    pub capacity: Option<i32>,
    #[serde(default = "default_amenities")]
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateRoomInput {
    #[validate(length(min = 1, max = 20))]
    pub room_number: Option<String>,
    pub room_type: Option<String>,
    #[validate(range(min = 1.0))]
    pub monthly_rent: Option<f64>,
    #[validate(range(min = 1))]
    pub capacity: Option<i32>,
    pub amenities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct ProfileUpdatesInput {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 120))]
    pub full_name: Option<String>,
    #[validate(length(max = 20))]
    pub mobile: Option<String>,
    pub role: Option<String>,
}

/// Admin tenant update. `allocation_updates` stays a raw JSON map because the
/// contract distinguishes `room_id: null` (remove the allocation) from the key
/// being absent (leave the room binding alone).
#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateTenantInput {
    #[validate(nested)]
    pub profile_updates: Option<ProfileUpdatesInput>,
    pub allocation_updates: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateSettingsInput {
    pub gateway_key_id: Option<String>,
    pub gateway_key_secret: Option<String>,
    pub bank_account_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub payments_enabled: Option<bool>,
    #[validate(range(min = 0.0))]
    pub single_room_rent: Option<f64>,
    #[validate(range(min = 0.0))]
    pub double_room_rent: Option<f64>,
    #[validate(range(min = 0.0))]
    pub triple_room_rent: Option<f64>,
    #[validate(range(min = 0))]
    pub notice_period_days: Option<i32>,
    #[validate(range(min = 0.0))]
    pub late_fee: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ListQuery {
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default = "default_offset_0")]
    pub offset: i64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: default_limit_100(),
            offset: default_offset_0(),
        }
    }
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 500)
}

pub fn serialize_to_map<T>(value: &T) -> Map<String, Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value).unwrap_or_else(|_| Value::Object(Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(mut map: Map<String, Value>) -> Map<String, Value> {
    map.retain(|_, value| !value.is_null());
    map
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RoomPath {
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UserPath {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::{clamp_limit, remove_nulls, serialize_to_map, UpdateSettingsInput};

    #[test]
    fn clamps_limits_into_range() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(10_000), 500);
    }

    #[test]
    fn partial_settings_serialize_without_nulls() {
        let input = UpdateSettingsInput {
            gateway_key_id: Some("rzp_test_123".to_string()),
            gateway_key_secret: None,
            bank_account_name: None,
            bank_account_number: None,
            bank_ifsc: None,
            payments_enabled: Some(true),
            single_room_rent: None,
            double_room_rent: None,
            triple_room_rent: None,
            notice_period_days: None,
            late_fee: None,
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("gateway_key_id"));
        assert!(map.contains_key("payments_enabled"));
    }
}
