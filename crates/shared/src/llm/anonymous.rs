//! No-credential provider path: the prompt travels in the URL path of a
//! read-only request. Capability-limited, but it is the path of last resort,
//! so it absorbs the provider's tier rejection into degraded-but-successful
//! output instead of raising it.

use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header;
use url::Url;

use super::dispatch::{
    AnonymousGateway, ClientBuildError, ClientError, GatewayFuture, GenerationReply,
};
use super::sanitize::sanitize_markdown;

pub struct AnonymousClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnonymousClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, ClientBuildError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ClientBuildError::HttpClient(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn send(
        &self,
        prompt: &str,
        model: &str,
        system_preamble: Option<&str>,
    ) -> Result<GenerationReply, ClientError> {
        let payload = combined_payload(prompt, system_preamble, cache_buster());
        let url = prompt_url(&self.base_url, &payload, model)?;

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/plain; charset=utf-8")
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ClientError::Timeout
                } else {
                    ClientError::ProviderFailure("request_unavailable".to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|_| ClientError::InvalidBody("response_body_read_failed".to_string()))?;

        interpret_reply(status, &body, model)
    }
}

impl AnonymousGateway for AnonymousClient {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        model: &'a str,
        system_preamble: Option<&'a str>,
    ) -> GatewayFuture<'a> {
        Box::pin(async move { self.send(prompt, model, system_preamble).await })
    }
}

/// Status 402 means the model needs authentication or a higher tier. There
/// is no weaker path left, so it becomes a successful apology reply rather
/// than an error.
fn interpret_reply(
    status: StatusCode,
    body: &str,
    model: &str,
) -> Result<GenerationReply, ClientError> {
    if status == StatusCode::PAYMENT_REQUIRED {
        return Ok(GenerationReply::Text(elevated_access_apology(model)));
    }
    if !status.is_success() {
        return Err(ClientError::ProviderFailure(format!(
            "status={}",
            status.as_u16()
        )));
    }

    Ok(GenerationReply::Text(sanitize_markdown(body)))
}

fn elevated_access_apology(model: &str) -> String {
    format!(
        "متأسفانه مدل {model} نیاز به احراز هویت یا سطح دسترسی بالاتر دارد و برای کاربران anonymous در دسترس نیست.\n\n🔐 برای استفاده از این مدل، لطفاً از مدل‌های رایگان دیگر استفاده کنید یا در صورت نیاز، احراز هویت انجام دهید."
    )
}

/// Preamble and prompt collapse into one text payload; the trailing request
/// token keeps intermediary caches from replaying an earlier answer.
fn combined_payload(prompt: &str, system_preamble: Option<&str>, request_token: i64) -> String {
    match system_preamble {
        Some(preamble) => {
            format!("{preamble}\n\nUser: {prompt}\n\n[Request ID: {request_token}]")
        }
        None => format!("{prompt}\n\n[Request ID: {request_token}]"),
    }
}

fn cache_buster() -> i64 {
    Utc::now().timestamp_millis()
}

fn prompt_url(base: &str, payload: &str, model: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)
        .map_err(|_| ClientError::ProviderFailure("invalid_provider_base_url".to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::ProviderFailure("invalid_provider_base_url".to_string()))?
        .pop_if_empty()
        .push(payload);
    url.query_pairs_mut().append_pair("model", model);
    Ok(url)
}
