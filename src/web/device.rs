use crate::web::ApiError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const DEVICE_HEADER: &str = "x-device-id";
const MAX_DEVICE_ID_LEN: usize = 128;

/// Axum extractor for the calling device. Chains are scoped per device.
///
/// Usage:
/// ```rust,ignore
/// async fn handler(DeviceId(device_id): DeviceId) -> ... {}
/// ```
#[derive(Debug, Clone)]
pub struct DeviceId(pub String);

fn parse_device_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_DEVICE_ID_LEN
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| trimmed.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for DeviceId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(DEVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::bad_request("missing x-device-id header"))?;

        parse_device_id(raw)
            .map(DeviceId)
            .ok_or_else(|| {
                tracing::warn!("Rejected malformed device id");
                ApiError::bad_request("malformed x-device-id header")
            })
    }
}
