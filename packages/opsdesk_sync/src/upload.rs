//! Out-of-band file transfer
//!
//! Files never travel over the multiplexed connection. They go to a plain
//! upload endpoint as a multipart body: the raw file, a JSON-encoded
//! conversation reference, a JSON-encoded author reference, and an
//! optional caption. The backend then pushes the resulting message event
//! like any other; correlation is by conversation and timestamp, not by
//! the secret-key mechanism used for text.

use reqwest::multipart::{Form, Part};

use crate::error::EngineError;
use crate::models::ParticipantRef;

pub(crate) fn upload_url(api_url: &str) -> String {
    format!("{}/upload", api_url.trim_end_matches('/'))
}

/// JSON body of the `chat` form part.
pub(crate) fn conversation_part(conversation: &str) -> String {
    serde_json::json!({ "id": conversation }).to_string()
}

/// JSON body of the `author` form part.
pub(crate) fn author_part(author: &ParticipantRef) -> String {
    serde_json::to_string(author).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) async fn send_file(
    http: &reqwest::Client,
    api_url: &str,
    conversation: &str,
    author: &ParticipantRef,
    file_name: String,
    bytes: Vec<u8>,
    caption: Option<String>,
) -> Result<(), EngineError> {
    let mut form = Form::new()
        .part("file", Part::bytes(bytes).file_name(file_name))
        .text("chat", conversation_part(conversation))
        .text("author", author_part(author));
    if let Some(caption) = caption {
        form = form.text("caption", caption);
    }

    let resp = http
        .post(upload_url(api_url))
        .multipart(form)
        .send()
        .await
        .map_err(|e| EngineError::Upload(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(EngineError::Upload(format!(
            "upload endpoint returned {}",
            resp.status()
        )));
    }
    Ok(())
}
