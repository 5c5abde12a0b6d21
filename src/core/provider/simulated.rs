//! Simulated streaming provider.
//!
//! Stands in for a real speech-to-text backend: every chunk produces the same
//! script of events, one per interval, regardless of the audio content.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::{ProviderEvent, ProviderStream, TranscriptionProvider};

pub const DEFAULT_SIMULATED_INTERVAL_MS: u64 = 80;

pub struct SimulatedProvider {
    interval: Duration,
    script: Arc<[ProviderEvent]>,
}

impl SimulatedProvider {
    /// Provider emitting the default "Hello world" script
    pub fn new(interval: Duration) -> Self {
        Self::with_script(interval, default_script())
    }

    pub fn with_script(interval: Duration, script: Vec<ProviderEvent>) -> Self {
        Self {
            interval,
            script: script.into(),
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SIMULATED_INTERVAL_MS))
    }
}

fn default_script() -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::Partial {
            text: "Hello".to_string(),
        },
        ProviderEvent::Partial {
            text: "Hello world".to_string(),
        },
        ProviderEvent::Final {
            text: "Hello world (simulated)".to_string(),
        },
    ]
}

impl TranscriptionProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn stream_chunk(&self, chunk: Bytes) -> ProviderStream {
        let interval = self.interval;
        let script = self.script.clone();

        Box::pin(async_stream::stream! {
            debug!(bytes = chunk.len(), "Simulating transcription for chunk");
            for event in script.iter() {
                tokio::time::sleep(interval).await;
                yield event.clone();
            }
        })
    }
}
