//! The dispatch core: picks a transport path for each exchange, applies the
//! silent authenticated-to-anonymous downgrade, and returns one normalized
//! reply per turn.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use super::catalog::ModelCatalog;
use crate::models::{Role, Turn};

/// Injected ahead of the final user turn so replies mirror the language the
/// question was asked in. Never persisted into session history.
pub const LANGUAGE_MIRROR_DIRECTIVE: &str = "به همان زبانی که کاربر سوال پرسیده پاسخ دهید. اگر فارسی پرسید، فارسی جواب دهید. اگر انگلیسی پرسید، انگلیسی جواب دهید. پاسخ‌های ساده، واضح و مفید ارائه دهید.";

pub type GatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GenerationReply, ClientError>> + Send + 'a>>;

/// Credentialed provider path: full structured conversation in, text or
/// binary audio out.
pub trait AuthenticatedGateway: Send + Sync {
    fn generate<'a>(
        &'a self,
        conversation: &'a [Turn],
        model: &'a str,
        private: bool,
        expects_audio: bool,
    ) -> GatewayFuture<'a>;
}

/// Anonymous provider path: one prompt string plus optional preamble in,
/// plain text out.
pub trait AnonymousGateway: Send + Sync {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        model: &'a str,
        system_preamble: Option<&'a str>,
    ) -> GatewayFuture<'a>;
}

/// Normalized per-exchange result. Ownership transfers to the caller, which
/// is responsible for materializing a retrievable URL for audio payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationReply {
    Text(String),
    Audio { media_type: String, bytes: Vec<u8> },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider request failed: {0}")]
    ProviderFailure(String),
    #[error("provider returned an unreadable body: {0}")]
    InvalidBody(String),
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("failed to build provider http client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("anonymous provider path failed: {0}")]
    Terminal(#[from] ClientError),
    #[error("conversation does not contain a user turn")]
    MissingUserTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    Authenticated,
    AnonymousRequested,
    AnonymousDefault,
}

/// The ordered decision rule, kept pure so the policy table is testable
/// without a network. The authenticated route is only worth attempting when
/// credentials are held, the model actually needs them, and the payload fits
/// under the provider's body-size ceiling.
pub fn choose_route(
    credentials_held: bool,
    anonymous_capable: bool,
    too_large: bool,
) -> DispatchRoute {
    if credentials_held && !anonymous_capable && !too_large {
        DispatchRoute::Authenticated
    } else if anonymous_capable {
        DispatchRoute::AnonymousRequested
    } else {
        DispatchRoute::AnonymousDefault
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub credentials_held: bool,
    pub max_authenticated_payload_chars: usize,
}

pub struct GenerationEngine {
    catalog: Arc<ModelCatalog>,
    authenticated: Arc<dyn AuthenticatedGateway>,
    anonymous: Arc<dyn AnonymousGateway>,
    policy: DispatchPolicy,
}

impl GenerationEngine {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        authenticated: Arc<dyn AuthenticatedGateway>,
        anonymous: Arc<dyn AnonymousGateway>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            catalog,
            authenticated,
            anonymous,
            policy,
        }
    }

    /// Runs one exchange. Authenticated-path failures are downgraded
    /// silently to the anonymous path; only an anonymous-path failure
    /// terminates the exchange. No client call is ever retried.
    pub async fn dispatch(
        &self,
        conversation: &[Turn],
        model_id: &str,
        private: bool,
    ) -> Result<GenerationReply, DispatchError> {
        let anonymous_capable = self.catalog.classify(model_id).anonymous_capable;
        let serialized_len = serde_json::to_string(conversation)
            .map_or(usize::MAX, |payload| payload.len());
        let too_large = serialized_len > self.policy.max_authenticated_payload_chars;

        let route = choose_route(self.policy.credentials_held, anonymous_capable, too_large);
        if route == DispatchRoute::Authenticated {
            let expects_audio = self
                .catalog
                .descriptor(model_id)
                .is_some_and(|descriptor| descriptor.supports_audio);
            match self
                .authenticated
                .generate(conversation, model_id, private, expects_audio)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    warn!(
                        model = %model_id,
                        "authenticated provider path failed, downgrading to anonymous path: {err}"
                    );
                }
            }
        }

        let prompt = conversation
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .ok_or(DispatchError::MissingUserTurn)?;
        let system_preamble = conversation
            .iter()
            .find(|turn| turn.role == Role::System)
            .map(|turn| turn.content.as_str());
        let effective_model = if anonymous_capable {
            model_id
        } else {
            self.catalog.default_model()
        };

        let reply = self
            .anonymous
            .generate(prompt, effective_model, system_preamble)
            .await?;
        Ok(reply)
    }
}

/// Builds the conversation handed to `dispatch`: recorded history, the
/// language-mirroring directive, then the new user turn.
pub fn assemble_conversation(history: &[Turn], user_prompt: &str) -> Vec<Turn> {
    let mut conversation = Vec::with_capacity(history.len() + 2);
    conversation.extend_from_slice(history);
    conversation.push(Turn::system(LANGUAGE_MIRROR_DIRECTIVE));
    conversation.push(Turn::user(user_prompt));
    conversation
}
