use serde::Serialize;
use tracing::{info, warn};

/// Detailed per-request body logging, enabled by `logging.enable_detailed_logs`.
#[derive(Debug, Clone)]
pub(crate) struct ExchangeLog {
    trace_id: String,
    enabled: bool,
}

impl ExchangeLog {
    pub(crate) fn new(trace_id: impl Into<String>, enabled: bool) -> Self {
        Self {
            trace_id: trace_id.into(),
            enabled,
        }
    }

    pub(crate) fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub(crate) fn record<T: Serialize>(&self, phase: &'static str, payload: &T) {
        if !self.enabled {
            return;
        }
        match serde_json::to_string(payload) {
            Ok(body) => info!(event = "exchange", trace_id = %self.trace_id, phase, body = %body),
            Err(err) => warn!(
                event = "exchange",
                trace_id = %self.trace_id,
                phase,
                error = %err,
                "payload is not serializable"
            ),
        }
    }

    /// Samples backend stream chunks: the first five, then every tenth.
    pub(crate) fn stream_chunk<T: Serialize>(&self, index: usize, chunk: &T) {
        if self.enabled && should_sample(index) {
            let body = serde_json::to_string(chunk).unwrap_or_default();
            info!(
                event = "exchange",
                trace_id = %self.trace_id,
                phase = "openai_stream_chunk",
                index,
                body = %body
            );
        }
    }

    pub(crate) fn stream_summary(&self, chunks_in: usize, frames_out: usize, outcome: &str) {
        if self.enabled {
            info!(
                event = "exchange",
                trace_id = %self.trace_id,
                phase = "stream_summary",
                chunks_in,
                frames_out,
                outcome
            );
        }
    }
}

fn should_sample(index: usize) -> bool {
    index <= 5 || index % 10 == 0
}
