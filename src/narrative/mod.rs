//! Flavor text for missions, results and the final reveal.
//!
//! Generated text is optional: [`NarrativeService::compose`] always returns
//! something printable, falling back to deterministic templates whenever the
//! generator is disabled, slow, failing or silent.

pub mod http;

use std::{sync::Arc, time::Duration};

use futures::future::{BoxFuture, ready};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::dao::models::{MissionResult, Side};

/// Failures of a text generator. Never surfaced to players.
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("narrative generation is disabled")]
    Disabled,
    #[error("narrative request failed: {message}")]
    Request { message: String },
    #[error("narrative request timed out")]
    Timeout,
    #[error("narrative service returned no text")]
    EmptyResponse,
}

/// Something that turns a prompt into prose.
pub trait Narrator: Send + Sync {
    fn narrate(&self, prompt: String) -> BoxFuture<'static, Result<String, NarrativeError>>;
}

/// Narrator used when no endpoint is configured.
pub struct DisabledNarrator;

impl Narrator for DisabledNarrator {
    fn narrate(&self, _prompt: String) -> BoxFuture<'static, Result<String, NarrativeError>> {
        Box::pin(ready(Err(NarrativeError::Disabled)))
    }
}

/// What a piece of flavor text is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrativeRequest {
    MissionIntro {
        round_number: u8,
        team_size: usize,
    },
    MissionOutcome {
        round_number: u8,
        result: MissionResult,
        gola_count: usize,
    },
    Kaos {
        round_number: u8,
    },
    FinalReveal {
        winner: Side,
        guess_correct: Option<bool>,
    },
}

impl NarrativeRequest {
    fn prompt(&self) -> String {
        match self {
            NarrativeRequest::MissionIntro {
                round_number,
                team_size,
            } => format!(
                "Skriv en kort, dramatisk introduktion till stöt nummer {round_number} \
                 för ett gäng i Stockholms undre värld. Teamet ska bestå av {team_size} personer. \
                 Max tre meningar, ingen lista."
            ),
            NarrativeRequest::MissionOutcome {
                round_number,
                result,
                gola_count,
            } => match result {
                MissionResult::Success => format!(
                    "Berätta i två meningar hur stöt nummer {round_number} gick vägen \
                     utan att någon golade."
                ),
                _ => format!(
                    "Berätta i två meningar hur stöt nummer {round_number} sprack \
                     för att {gola_count} person(er) golade. Avslöja inga namn."
                ),
            },
            NarrativeRequest::Kaos { round_number } => format!(
                "Berätta i två meningar hur gänget inte kunde enas om ett team \
                 för stöt nummer {round_number} och allt slutade i kaos."
            ),
            NarrativeRequest::FinalReveal { winner, .. } => format!(
                "Skriv en kort, filmisk inledning till det stora avslöjandet där {} \
                 vinner spelet. Max tre meningar.",
                side_label(*winner)
            ),
        }
    }

    /// Deterministic text used when generation is unavailable.
    pub fn template(&self) -> String {
        match self {
            NarrativeRequest::MissionIntro {
                round_number,
                team_size,
            } => format!(
                "Stöt {round_number}: ett nytt jobb väntar. Capon behöver {team_size} \
                 pålitliga personer. Frågan är vem som går att lita på."
            ),
            NarrativeRequest::MissionOutcome {
                round_number,
                result: MissionResult::Success,
                ..
            } => format!("Stöt {round_number} gick som smort. Ingen golade den här gången."),
            NarrativeRequest::MissionOutcome {
                round_number,
                gola_count,
                ..
            } => format!(
                "Stöt {round_number} sprack. {gola_count} i teamet valde att gola."
            ),
            NarrativeRequest::Kaos { round_number } => format!(
                "Kaos! Tre förslag i rad röstades ner och stöt {round_number} rann ut i sanden."
            ),
            NarrativeRequest::FinalReveal { winner, .. } => format!(
                "Dammet har lagt sig. Det är dags att se vilka som verkligen var golare. \
                 {} tar hem spelet.",
                side_label(*winner)
            ),
        }
    }
}

fn side_label(side: Side) -> &'static str {
    match side {
        Side::Akta => "de äkta",
        Side::Golare => "golarna",
    }
}

/// Narrator wrapped with a timeout, a sanitizer and template fallback.
#[derive(Clone)]
pub struct NarrativeService {
    narrator: Arc<dyn Narrator>,
    timeout: Duration,
    max_chars: usize,
}

impl NarrativeService {
    pub fn new(narrator: Arc<dyn Narrator>, timeout: Duration, max_chars: usize) -> Self {
        Self {
            narrator,
            timeout,
            max_chars,
        }
    }

    /// Service that always answers with templates.
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledNarrator), Duration::from_secs(1), 900)
    }

    /// Sanitized generated text, or the request's template.
    pub async fn compose(&self, request: &NarrativeRequest) -> String {
        match self.generate(request).await {
            Ok(text) => text,
            Err(NarrativeError::Disabled) => sanitize(&request.template(), self.max_chars),
            Err(err) => {
                debug!(error = %err, ?request, "narrative unavailable; using template");
                sanitize(&request.template(), self.max_chars)
            }
        }
    }

    async fn generate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
        let raw = timeout(self.timeout, self.narrator.narrate(request.prompt()))
            .await
            .map_err(|_| NarrativeError::Timeout)??;
        let text = sanitize(&raw, self.max_chars);
        if text.is_empty() {
            return Err(NarrativeError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Make arbitrary text safe for HTML message bodies.
///
/// Control characters are stripped, runs of blank lines collapse to one, the
/// length is capped at `max_chars` characters (ellipsis included) and HTML
/// metacharacters are escaped last so the cap never splits an entity.
///
/// The cap counts visible characters. Telegram measures message length after
/// parsing entities, so `&lt;` costs one character of the budget, not four.
pub fn sanitize(raw: &str, max_chars: usize) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c == '\n' || !c.is_control())
        .collect();

    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = false;
    for line in cleaned.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            if !blank_run && !lines.is_empty() {
                lines.push("");
            }
            blank_run = true;
        } else {
            lines.push(line);
            blank_run = false;
        }
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    let collapsed = lines.join("\n");

    let capped = if collapsed.chars().count() > max_chars {
        let mut truncated: String = collapsed.chars().take(max_chars.saturating_sub(1)).collect();
        truncated.truncate(truncated.trim_end().len());
        truncated.push('…');
        truncated
    } else {
        collapsed
    };

    escape_html(&capped)
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
