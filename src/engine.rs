//! Client for the external automation engine.
//!
//! The engine is a black box reached by HTTP POST; it processes
//! asynchronously and calls back at an unspecified future time (or
//! never). Dispatch is fire-and-forget: any 2xx means the handoff
//! succeeded, and the response body is not interpreted.
//!
//! The trait seam exists so the orchestration paths can be tested with
//! recording/failing fakes instead of a live engine.

use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::WebhookPayload;
use crate::error::EngineError;

#[async_trait]
pub trait DiligenceEngine: Send + Sync {
    /// POST a stage payload to the engine. Ok(()) iff the engine
    /// acknowledged with a 2xx.
    async fn dispatch(&self, endpoint: &str, payload: &WebhookPayload)
        -> Result<(), EngineError>;
}

/// Production engine client over a shared reqwest client.
pub struct HttpEngine {
    client: reqwest::Client,
}

impl HttpEngine {
    /// Build with an explicit request timeout. The engine's processing
    /// is async; only the dispatch handoff is bounded here.
    pub fn new(timeout_secs: u64) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DiligenceEngine for HttpEngine {
    async fn dispatch(
        &self,
        endpoint: &str,
        payload: &WebhookPayload,
    ) -> Result<(), EngineError> {
        let response = self.client.post(endpoint).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            log::info!("engine dispatch accepted ({}) -> {}", status, endpoint);
            return Ok(());
        }

        let body = bounded_body(response.text().await.unwrap_or_default());
        Err(EngineError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Keep a bounded prefix of the body for diagnostics. The engine's
/// body content is unconstrained, so the cut must land on a char
/// boundary.
fn bounded_body(body: String) -> String {
    const MAX_BYTES: usize = 200;
    if body.len() <= MAX_BYTES {
        return body;
    }
    let mut end = MAX_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_body_passes_short_bodies_through() {
        assert_eq!(bounded_body("bad request".to_string()), "bad request");
    }

    #[test]
    fn test_bounded_body_truncates_long_ascii() {
        let body = "x".repeat(500);
        let bounded = bounded_body(body);
        assert_eq!(bounded.len(), 203);
        assert!(bounded.ends_with("..."));
    }

    #[test]
    fn test_bounded_body_respects_multibyte_boundaries() {
        // 300 bytes of 3-byte chars; byte 200 falls mid-character
        let body = "€".repeat(100);
        let bounded = bounded_body(body);
        assert!(bounded.ends_with("..."));
        assert!(bounded.strip_suffix("...").unwrap().chars().all(|c| c == '€'));
    }
}
