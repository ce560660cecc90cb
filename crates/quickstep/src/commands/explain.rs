//! `explain-consumer`: run the consumer decision on a recorded context.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use quickstep_app::input::{
    ConsumerContext, ConsumerFlags, ConsumerSelection, MotionAction, MotionEvent, ReasonTrace, select_consumer,
};
use quickstep_core::id::DisplayId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Recorded gesture: the context at touch down plus the events that follow.
#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub context: ConsumerContext,
    #[serde(default = "default_event")]
    pub event: MotionEvent,
    #[serde(default)]
    pub follow_up: Vec<MotionEvent>,
}

const fn default_event() -> MotionEvent {
    MotionEvent::new(MotionAction::Down, 0.0, 0.0)
}

/// Selected chain and how it handled the recorded events.
#[derive(Debug, Serialize)]
pub struct Explanation {
    pub display_id: DisplayId,
    pub consumer: String,
    pub flags: ConsumerFlags,
    pub reasons: ReasonTrace,
    /// Consumer handling the gesture after every event was dispatched.
    pub active: String,
}

impl Explanation {
    /// Plain-text report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "display:  {}", self.display_id);
        let _ = writeln!(out, "consumer: {}", self.consumer);
        let _ = writeln!(out, "flags:    {}", flag_names(self.flags));
        let _ = writeln!(out, "active:   {}", self.active);
        let _ = writeln!(out, "reasons:");
        for reason in self.reasons.reasons() {
            let _ = writeln!(out, "  - {reason}");
        }
        out
    }
}

fn flag_names(flags: ConsumerFlags) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "(none)".to_owned()
    } else {
        names.join(" | ")
    }
}

/// Load a request from a JSON file and explain it.
pub fn from_file(path: &Path) -> Result<Explanation> {
    let contents = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let request: ExplainRequest =
        serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(explain(&request))
}

/// Select the consumer for `request` and replay its events through it.
pub fn explain(request: &ExplainRequest) -> Explanation {
    let ConsumerSelection { mut consumer, reasons } = select_consumer(&request.context, &request.event);
    debug!(consumer = %consumer, reasons = %reasons, "Explaining input consumer");

    consumer.on_motion_event(&request.event);
    for event in &request.follow_up {
        consumer.on_motion_event(event);
    }

    Explanation {
        display_id: consumer.display_id(),
        consumer: consumer.name(),
        flags: consumer.consumer_type(),
        reasons,
        active: consumer.active_consumer_in_hierarchy().name(),
    }
}
