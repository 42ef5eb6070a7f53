use std::{env, sync::Arc};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{NarrativeError, Narrator};
use crate::config::NarrativeConfig;

const API_KEY_ENV: &str = "NARRATIVE_API_KEY";
const SYSTEM_PROMPT: &str = "Du är berättarrösten i ett socialt deduktionsspel om ett gäng \
     i Stockholm där några är golare. Skriv på svenska, kort och stämningsfullt, utan markdown.";

/// Chat-completions client for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct HttpNarrator {
    client: Client,
    endpoint: Arc<str>,
    model: Arc<str>,
    api_key: Option<Arc<str>>,
}

impl HttpNarrator {
    /// Build a narrator from configuration; `None` when no endpoint is configured.
    pub fn from_config(config: &NarrativeConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        let api_key = env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .map(Arc::<str>::from);
        info!(endpoint, model = %config.model, "narrative generation enabled");

        Some(Self {
            client: Client::new(),
            endpoint: Arc::from(endpoint),
            model: Arc::from(config.model.as_str()),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Narrator for HttpNarrator {
    fn narrate(&self, prompt: String) -> BoxFuture<'static, Result<String, NarrativeError>> {
        let narrator = self.clone();
        Box::pin(async move {
            let body = json!({
                "model": narrator.model.as_ref(),
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
                "max_tokens": 400,
                "temperature": 0.9,
            });

            let mut request = narrator.client.post(narrator.endpoint.as_ref()).json(&body);
            if let Some(key) = &narrator.api_key {
                request = request.bearer_auth(key.as_ref());
            }

            let response = request
                .send()
                .await
                .map_err(|err| NarrativeError::Request {
                    message: err.without_url().to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(NarrativeError::Request {
                    message: format!("unexpected status {status}"),
                });
            }

            let payload: CompletionResponse =
                response.json().await.map_err(|err| NarrativeError::Request {
                    message: err.without_url().to_string(),
                })?;

            payload
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|content| !content.trim().is_empty())
                .ok_or(NarrativeError::EmptyResponse)
        })
    }
}
