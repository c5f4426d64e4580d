use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::detect::Detection;

/// Lifecycle of a session.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl SessionState {
    /// Running or paused: a workflow owns the engine.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Completed => "completed",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Position of an action in the workflow tree, e.g. `1/0/2` for the third child of the
/// first child of the second top-level action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ActionPath(Vec<usize>);

impl ActionPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(index);
        Self(segments)
    }

    /// Index within the enclosing list.
    pub fn index(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<usize>> for ActionPath {
    fn from(segments: Vec<usize>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for ActionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl Serialize for ActionPath {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// The mutable state of the one active run.
#[derive(Debug, Default)]
pub struct ExecutionSession {
    pub state: SessionState,
    pub workflow: Option<String>,
    /// 1-based iteration of the workflow-level loop.
    pub current_loop: u32,
    pub current_action_index: Option<usize>,
    pub current_path: Option<ActionPath>,
    pub is_paused: bool,
    pub should_stop: bool,
    pub dry_run: bool,
    pub last_detection: Option<Detection>,
    pub actions_executed: u64,
    pub last_error: Option<String>,
    anchors: HashMap<ActionPath, (i32, i32)>,
}

impl ExecutionSession {
    /// Reset for a new run of `workflow`.
    pub fn begin(&mut self, workflow: &str, dry_run: bool) {
        *self = Self {
            state: SessionState::Running,
            workflow: Some(workflow.to_string()),
            dry_run,
            ..Self::default()
        };
    }

    pub fn anchor(&self, path: &ActionPath) -> Option<(i32, i32)> {
        self.anchors.get(path).copied()
    }

    pub fn set_anchor(&mut self, path: ActionPath, point: (i32, i32)) {
        self.anchors.insert(path, point);
    }

    pub fn clear_anchors(&mut self) {
        self.anchors.clear();
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            workflow: self.workflow.clone(),
            current_loop: self.current_loop,
            current_action_index: self.current_action_index,
            current_path: self.current_path.as_ref().map(ToString::to_string),
            is_paused: self.is_paused,
            should_stop: self.should_stop,
            dry_run: self.dry_run,
            last_detection: self.last_detection,
            actions_executed: self.actions_executed,
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time copy of the session for `status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub workflow: Option<String>,
    pub current_loop: u32,
    pub current_action_index: Option<usize>,
    pub current_path: Option<String>,
    pub is_paused: bool,
    pub should_stop: bool,
    pub dry_run: bool,
    pub last_detection: Option<Detection>,
    pub actions_executed: u64,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_render_as_slash_separated_indices() {
        let p = ActionPath::root().child(1).child(0).child(2);
        assert_eq!(p.to_string(), "1/0/2");
        assert_eq!(p.index(), Some(2));
        assert_eq!(p.depth(), 3);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"1/0/2\"");
        assert_eq!(ActionPath::root().index(), None);
    }

    #[test]
    fn begin_clears_previous_run() {
        let mut s = ExecutionSession::default();
        s.begin("first", false);
        s.set_anchor(ActionPath::from(vec![0]), (1, 2));
        s.actions_executed = 4;
        s.last_error = Some("boom".into());

        s.begin("second", true);
        assert_eq!(s.state, SessionState::Running);
        assert_eq!(s.workflow.as_deref(), Some("second"));
        assert!(s.dry_run);
        assert_eq!(s.anchor_count(), 0);
        assert_eq!(s.actions_executed, 0);
        assert!(s.last_error.is_none());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let mut s = ExecutionSession::default();
        s.begin("wf", false);
        s.current_path = Some(ActionPath::from(vec![2, 1]));
        let v = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(v["state"], "running");
        assert_eq!(v["currentPath"], "2/1");
        assert_eq!(v["isPaused"], false);
    }
}
