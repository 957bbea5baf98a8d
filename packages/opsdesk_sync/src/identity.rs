//! Identity bootstrap
//!
//! On connect the engine asks the REST side who it is; conversation-list
//! requests are held back until this answers, because the backend scopes
//! them to the authenticated agent.

use serde::Deserialize;

use crate::error::EngineError;
use crate::models::ParticipantRef;

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    id: String,
    name: String,
}

impl From<IdentityResponse> for ParticipantRef {
    fn from(body: IdentityResponse) -> Self {
        ParticipantRef {
            id: body.id,
            name: body.name,
        }
    }
}

pub(crate) fn identity_url(api_url: &str) -> String {
    format!("{}/identity", api_url.trim_end_matches('/'))
}

pub(crate) async fn fetch_identity(
    http: &reqwest::Client,
    api_url: &str,
) -> Result<ParticipantRef, EngineError> {
    let resp = http
        .get(identity_url(api_url))
        .send()
        .await
        .map_err(|e| EngineError::Identity(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(EngineError::Identity(format!(
            "identity endpoint returned {}",
            resp.status()
        )));
    }
    let body: IdentityResponse = resp
        .json()
        .await
        .map_err(|e| EngineError::Identity(e.to_string()))?;
    Ok(body.into())
}
