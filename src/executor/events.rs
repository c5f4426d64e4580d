use serde::Serialize;

use super::session::{ActionPath, SessionState};
use crate::detect::Detection;

/// Which loop a loop event belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopScope {
    /// The workflow-level `loopCount` loop.
    Workflow,
    /// A `loop` action.
    Action,
}

/// Lifecycle and progress notifications, published on a broadcast channel.
///
/// Serialized with an `event` tag carrying the wire name (`"loop:start"`, `"wait:tick"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    #[serde(rename = "start")]
    Start {
        workflow: String,
        loop_count: u32,
        dry_run: bool,
    },
    #[serde(rename = "complete")]
    Complete {
        workflow: String,
        loops: u32,
        actions: u64,
    },
    #[serde(rename = "stopped")]
    Stopped { workflow: String, emergency: bool },
    #[serde(rename = "error")]
    Error { workflow: String, message: String },
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "resumed")]
    Resumed,
    #[serde(rename = "state:change")]
    StateChange {
        from: SessionState,
        to: SessionState,
    },

    #[serde(rename = "loop:start")]
    LoopStart {
        scope: LoopScope,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<ActionPath>,
        iteration: u32,
        /// `None` for loops that run until stopped.
        total: Option<u32>,
    },
    #[serde(rename = "loop:delay")]
    LoopDelay {
        scope: LoopScope,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<ActionPath>,
        iteration: u32,
        delay_ms: u64,
    },
    #[serde(rename = "loop:end")]
    LoopEnd {
        scope: LoopScope,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<ActionPath>,
        iteration: u32,
    },

    #[serde(rename = "action:start")]
    ActionStart {
        path: ActionPath,
        action: &'static str,
        name: Option<String>,
    },
    #[serde(rename = "action:complete")]
    ActionComplete {
        path: ActionPath,
        action: &'static str,
    },
    #[serde(rename = "action:error")]
    ActionError {
        path: ActionPath,
        action: &'static str,
        message: String,
        /// The error was discarded by `continueOnError`.
        continued: bool,
    },
    #[serde(rename = "action:skipped")]
    ActionSkipped {
        path: ActionPath,
        action: &'static str,
    },
    #[serde(rename = "action:dryrun")]
    ActionDryRun {
        path: ActionPath,
        action: &'static str,
    },

    #[serde(rename = "detection:found")]
    DetectionFound {
        path: ActionPath,
        detection: Detection,
    },
    #[serde(rename = "detection:notfound")]
    DetectionNotFound { path: ActionPath, target: String },

    #[serde(rename = "wait:start")]
    WaitStart { path: ActionPath, duration: u64 },
    #[serde(rename = "wait:tick")]
    WaitTick {
        path: ActionPath,
        duration: u64,
        remaining: u64,
        elapsed: u64,
        paused: bool,
    },
}

impl EngineEvent {
    /// Wire name, e.g. `"action:start"`.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Start { .. } => "start",
            EngineEvent::Complete { .. } => "complete",
            EngineEvent::Stopped { .. } => "stopped",
            EngineEvent::Error { .. } => "error",
            EngineEvent::Paused => "paused",
            EngineEvent::Resumed => "resumed",
            EngineEvent::StateChange { .. } => "state:change",
            EngineEvent::LoopStart { .. } => "loop:start",
            EngineEvent::LoopDelay { .. } => "loop:delay",
            EngineEvent::LoopEnd { .. } => "loop:end",
            EngineEvent::ActionStart { .. } => "action:start",
            EngineEvent::ActionComplete { .. } => "action:complete",
            EngineEvent::ActionError { .. } => "action:error",
            EngineEvent::ActionSkipped { .. } => "action:skipped",
            EngineEvent::ActionDryRun { .. } => "action:dryrun",
            EngineEvent::DetectionFound { .. } => "detection:found",
            EngineEvent::DetectionNotFound { .. } => "detection:notfound",
            EngineEvent::WaitStart { .. } => "wait:start",
            EngineEvent::WaitTick { .. } => "wait:tick",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_wire_names() {
        let tick = EngineEvent::WaitTick {
            path: ActionPath::from(vec![0, 3]),
            duration: 1000,
            remaining: 250,
            elapsed: 750,
            paused: false,
        };
        assert_eq!(
            serde_json::to_value(&tick).unwrap(),
            json!({
                "event": "wait:tick",
                "path": "0/3",
                "duration": 1000,
                "remaining": 250,
                "elapsed": 750,
                "paused": false
            })
        );
        assert_eq!(tick.name(), "wait:tick");

        let start = EngineEvent::LoopStart {
            scope: LoopScope::Workflow,
            path: None,
            iteration: 1,
            total: Some(2),
        };
        assert_eq!(
            serde_json::to_value(&start).unwrap(),
            json!({"event": "loop:start", "scope": "workflow", "iteration": 1, "total": 2})
        );
        assert_eq!(
            serde_json::to_value(EngineEvent::Paused).unwrap(),
            json!({"event": "paused"})
        );
    }
}
