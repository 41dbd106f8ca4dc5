use crate::agent_state::AgentStateSource;
use chrono::{DateTime, Utc};
use hive_core::ansi::strip_and_join;
use hive_core::config::{DashboardSettings, StatusPatterns};
use hive_core::{PaneItem, PaneStatus};

/// Derives the user-visible status of a pane. The first matching rule wins:
/// disconnected, dead, restore failure, agent side channel, output patterns,
/// idle timeout, and finally running.
pub fn classify(
    pane: &PaneItem,
    lines: &[String],
    settings: &DashboardSettings,
    agents: &dyn AgentStateSource,
    now: DateTime<Utc>,
) -> PaneStatus {
    if pane.disconnected {
        return PaneStatus::Disconnected;
    }
    if pane.dead {
        return if pane.dead_status != 0 {
            PaneStatus::Error
        } else {
            PaneStatus::Done
        };
    }
    if pane.restore_failed {
        return PaneStatus::Error;
    }

    let output = strip_and_join(lines);
    if let Some(reported) = agents.lookup(&pane.id, now) {
        if reported != PaneStatus::Idle {
            return reported;
        }
        // An idle agent can still be mid-command from the shell's point of view.
        if settings.patterns.running.is_match(&output) {
            return PaneStatus::Running;
        }
        return PaneStatus::Idle;
    }

    if let Some(status) = match_output(&output, &settings.patterns) {
        return status;
    }

    if let Some(last_active) = pane.last_active {
        let quiet_for = now
            .signed_duration_since(last_active)
            .to_std()
            .unwrap_or_default();
        if quiet_for > settings.idle_threshold {
            return PaneStatus::Idle;
        }
    }

    PaneStatus::Running
}

/// Error beats success so a failure printed after "done" still reads as failed.
pub fn match_output(output: &str, patterns: &StatusPatterns) -> Option<PaneStatus> {
    if output.trim().is_empty() {
        return None;
    }
    if patterns.error.is_match(output) {
        return Some(PaneStatus::Error);
    }
    if patterns.success.is_match(output) {
        return Some(PaneStatus::Done);
    }
    if patterns.running.is_match(output) {
        return Some(PaneStatus::Running);
    }
    None
}
