//! SSE framer. Turns `FrameEvent`s into `data: <json>\n\n` bytes and
//! appends the terminal `data: [DONE]\n\n` marker — the stream always
//! terminates with `[DONE]`, including on error.

use super::FrameEvent;
use crate::stream::metrics::StreamMetrics;

pub const DONE_MARKER: &str = "data: [DONE]\n\n";

/// Render one event as an SSE frame, recording its size in `metrics`.
pub fn frame(event: &FrameEvent, metrics: &mut StreamMetrics) -> String {
    let json = serde_json::to_string(event).expect("FrameEvent serialization is infallible");
    let frame = format!("data: {json}\n\n");
    metrics.record_event(frame.len());
    frame
}

/// The literal terminal marker; not counted in `StreamMetrics` since it
/// carries no JSON payload.
pub fn done() -> &'static str {
    DONE_MARKER
}
