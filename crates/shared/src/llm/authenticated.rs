//! Credentialed provider path: structured conversation over POST, with a
//! bearer token when one is configured. The only path that can come back
//! with a binary audio body.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header;
use serde_json::json;

use super::dispatch::{
    AuthenticatedGateway, ClientBuildError, ClientError, GatewayFuture, GenerationReply,
};
use super::sanitize::sanitize_markdown;
use crate::models::Turn;

const EMPTY_AUDIO_APOLOGY: &str = "⚠️ فایل صوتی خالی دریافت شد. لطفاً دوباره تلاش کنید.";
const VOICE_MODEL_UNAVAILABLE: &str =
    "⚠️ مدل صوتی در حال حاضر در دسترس نیست. لطفاً از مدل‌های متنی استفاده کنید.";

pub struct AuthenticatedClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl AuthenticatedClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self, ClientBuildError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ClientBuildError::HttpClient(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_token,
        })
    }

    async fn send(
        &self,
        conversation: &[Turn],
        model: &str,
        private: bool,
        expects_audio: bool,
    ) -> Result<GenerationReply, ClientError> {
        let request_body = json!({
            "messages": conversation,
            "model": model,
            "private": private,
        });

        let url = format!("{}/", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&request_body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::ProviderFailure("request_unavailable".to_string())
            }
        })?;

        let status = response.status();
        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|_| ClientError::InvalidBody("response_body_read_failed".to_string()))?;

        interpret_reply(status, &media_type, &body, expects_audio)
    }
}

impl AuthenticatedGateway for AuthenticatedClient {
    fn generate<'a>(
        &'a self,
        conversation: &'a [Turn],
        model: &'a str,
        private: bool,
        expects_audio: bool,
    ) -> GatewayFuture<'a> {
        Box::pin(async move { self.send(conversation, model, private, expects_audio).await })
    }
}

/// Normalizes the provider's heterogeneous response shapes. A zero-length
/// audio body and a voice model answering in failure-flavored text both
/// degrade to fixed apology replies; the user always sees something.
fn interpret_reply(
    status: StatusCode,
    media_type: &str,
    body: &[u8],
    expects_audio: bool,
) -> Result<GenerationReply, ClientError> {
    if !status.is_success() {
        return Err(ClientError::ProviderFailure(format!(
            "status={}",
            status.as_u16()
        )));
    }

    if media_type.starts_with("audio/") {
        if body.is_empty() {
            return Ok(GenerationReply::Text(EMPTY_AUDIO_APOLOGY.to_string()));
        }
        return Ok(GenerationReply::Audio {
            media_type: media_type.to_string(),
            bytes: body.to_vec(),
        });
    }

    let text = String::from_utf8_lossy(body);
    if expects_audio && is_voice_failure_text(&text) {
        return Ok(GenerationReply::Text(VOICE_MODEL_UNAVAILABLE.to_string()));
    }

    Ok(GenerationReply::Text(sanitize_markdown(&text)))
}

fn is_voice_failure_text(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("error") || lower.contains("not supported") || lower.contains("unavailable")
}
