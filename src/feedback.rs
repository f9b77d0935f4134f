//! User-facing outcome reporting.
//!
//! Feedback is a pure side channel: it never blocks the control loop and
//! never fails it. Events are rendered as chat-style lines through the
//! logging layer, gated by the policy's verbose flag; trace events require
//! the debug flag as well.

use tracing::info;

/// Outcome events worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEvent {
    /// The tuning setting was written.
    Updated { old: u32, new: u32 },
    /// Someone else changed the setting since our last write.
    ExternallyModified { now: u32 },
    /// Latency became unavailable; fast polling engaged.
    DiscoveryEntered,
    /// Latency came back; steady polling restored.
    DiscoveryExited,
    /// Debug-level trace line.
    Trace(String),
}

impl FeedbackEvent {
    /// Human-readable message for this event.
    pub fn message(&self) -> String {
        match self {
            FeedbackEvent::Updated { old, new } => {
                let delta = new.abs_diff(*old);
                format!(
                    "spell queue window {} -> {} ms (delta {} ms)",
                    old, new, delta
                )
            }
            FeedbackEvent::ExternallyModified { now } => {
                format!("spell queue window changed externally, now {} ms", now)
            }
            FeedbackEvent::DiscoveryEntered => {
                "latency unavailable, polling faster until it returns".to_string()
            }
            FeedbackEvent::DiscoveryExited => "latency restored, steady polling".to_string(),
            FeedbackEvent::Trace(msg) => msg.clone(),
        }
    }
}

/// Whether an event passes the verbose/debug gates.
pub fn should_emit(event: &FeedbackEvent, verbose: bool, debug: bool) -> bool {
    match event {
        FeedbackEvent::Trace(_) => verbose && debug,
        _ => verbose,
    }
}

/// Report an event to the user. Output failures are swallowed; the logging
/// layer already never propagates them into the caller.
pub fn emit(event: &FeedbackEvent, verbose: bool, debug: bool) {
    if !should_emit(event, verbose, debug) {
        return;
    }
    info!(target: "spellqueue::feedback", "{}", event.message());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_gates_everything() {
        let event = FeedbackEvent::Updated { old: 100, new: 60 };
        assert!(should_emit(&event, true, false));
        assert!(!should_emit(&event, false, false));
        assert!(!should_emit(&event, false, true));
    }

    #[test]
    fn trace_also_requires_debug() {
        let event = FeedbackEvent::Trace("poll".to_string());
        assert!(!should_emit(&event, true, false));
        assert!(should_emit(&event, true, true));
        assert!(!should_emit(&event, false, true));
    }

    #[test]
    fn updated_message_includes_delta() {
        let msg = FeedbackEvent::Updated { old: 100, new: 60 }.message();
        assert!(msg.contains("100"));
        assert!(msg.contains("60"));
        assert!(msg.contains("40"));
    }
}
