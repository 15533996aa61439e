//! Provider-stream retry wrapper implementing the scheduler's retry policy
//! (spec §4.1): at most one same-turn retry, and only when the failure
//! happened before any visible output reached the UI.

use crate::error::AgentError;
use pulse_agent_core::{ChatRequest, Provider, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument};

/// Drive one turn's provider stream, retrying at most once under the rules
/// above. `on_event` is invoked for every event of the *accepted* attempt —
/// events from a discarded, retried attempt are never forwarded, since the
/// whole point of "no visible output yet" is that nothing has reached the
/// UI to roll back.
#[instrument(
    name = "agent.llm.stream_with_retry",
    skip(provider, req, on_event, cancel_token),
    fields(session_id = %session_id, attempt = tracing::field::Empty)
)]
pub async fn stream_with_retry<'a>(
    provider: &dyn Provider,
    session_id: &str,
    req: &ChatRequest,
    mut on_event: impl FnMut(StreamEvent) + Send + 'a,
    cancel_token: &CancellationToken,
) -> Result<(), AgentError> {
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        Span::current().record("attempt", attempt);

        if cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let mut visible_output = false;
        let mut done_seen = false;
        let is_cancelled = || cancel_token.is_cancelled();

        let result = provider
            .chat_stream(
                req,
                &mut |event: StreamEvent| {
                    if event.is_visible_output() {
                        visible_output = true;
                    }
                    if matches!(event, StreamEvent::Done { .. }) {
                        done_seen = true;
                    }
                    on_event(event);
                },
                &is_cancelled,
            )
            .await;

        match result {
            Ok(()) => return Ok(()),
            Err(_) if done_seen => {
                // Rule 5: an error surfacing after `done` is simply ignored.
                debug!(session_id, "ignoring provider error after done");
                return Ok(());
            }
            Err(e) if visible_output => {
                // Rule 4: never retry once the model has started talking.
                return Err(AgentError::ProviderAfterOutput(e.to_string()));
            }
            Err(e) if attempt == 1 => {
                info!(
                    session_id,
                    "retrying provider stream after pre-output error: {e}"
                );
                continue;
            }
            Err(e) => {
                // Rule 6: cap retries at one per turn.
                return Err(AgentError::Provider(e.to_string()));
            }
        }
    }
}
