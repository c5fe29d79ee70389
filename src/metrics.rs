use tracing::trace;

// Trace-based counters; a recorder can be attached later by subscribing to
// the `showroom.metrics` target.

pub fn image_upload(outcome: &'static str) {
    trace!(
        target: "showroom.metrics",
        outcome = outcome,
        "image_uploads_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target: "showroom.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
