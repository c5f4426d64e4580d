use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, trace, warn};

use super::error::EngineError;
use super::events::{EngineEvent, LoopScope};
use super::session::{ActionPath, ExecutionSession, SessionState, StatusSnapshot};
use crate::config::{
    Action, ActionKind, Condition, ConditionKind, ConditionalAction, DelayRange, ErrorPolicy,
    ImageDetectAction, KeyboardAction, KeyboardMode, LoopAction, MouseClickAction,
    MouseMoveAction, MoveMode, PixelDetectAction, PointerTarget, Settings, WaitAction,
    WaitTarget, WaitUntil, Workflow, validate_settings, validate_workflow,
};
use crate::detect::{
    Detection, FrameGrabber, ImageQuery, PixelQuery, PollOptions, ScreenDetector,
    TemplateLoader, WaitOutcome,
};
use crate::input::{InputSimulator, Key, MoveOptions, SharedDevice, parse_combo};
use crate::utils::{Gate, RunSignal, lock};

/// Maximum nesting depth for action execution.
const MAX_DEPTH: usize = 64;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 1024;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-run options.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Walk the tree and keep its timing without touching the device or the screen.
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Stopped,
}

/// How a successful `execute` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Workflow-level iterations that ran to the end.
    pub loops_completed: u32,
    pub actions_executed: u64,
    /// Ended by `emergency_stop`.
    pub emergency: bool,
}

struct PendingSettings {
    version: u64,
    settings: Settings,
}

/// State reachable from every handle.
struct Shared {
    session: Mutex<ExecutionSession>,
    signal: watch::Sender<RunSignal>,
    events: broadcast::Sender<EngineEvent>,
    device: SharedDevice,
    settings: Mutex<PendingSettings>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, ExecutionSession> {
        lock(&self.session)
    }

    fn emit(&self, event: EngineEvent) {
        trace!(target: "tactile::runtime", event = event.name(), "emit");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&self, session: &mut ExecutionSession, to: SessionState) {
        let from = session.state;
        if from != to {
            session.state = to;
            debug!(target: "tactile::runtime", %from, %to, "State change");
            self.emit(EngineEvent::StateChange { from, to });
        }
    }

    fn release_all(&self) -> usize {
        lock(&self.device).release_all()
    }
}

/// Cloneable control surface for a running engine: pause, resume, stop, emergency stop,
/// status, event subscription and settings updates.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Park the walk at its next suspension point.
    pub fn pause(&self) -> Result<(), EngineError> {
        let mut s = self.shared.session();
        if s.state != SessionState::Running || s.should_stop {
            return Err(EngineError::InvalidTransition {
                op: "pause",
                state: s.state,
            });
        }
        s.is_paused = true;
        self.shared.transition(&mut s, SessionState::Paused);
        self.shared.signal.send_replace(RunSignal::Pause);
        drop(s);
        info!(target: "tactile::runtime", "Paused");
        self.shared.emit(EngineEvent::Paused);
        Ok(())
    }

    /// Continue a paused run. Click anchors are forgotten, so anchor-less clicks re-capture
    /// the pointer position.
    pub fn resume(&self) -> Result<(), EngineError> {
        let mut s = self.shared.session();
        if s.state != SessionState::Paused {
            return Err(EngineError::InvalidTransition {
                op: "resume",
                state: s.state,
            });
        }
        s.is_paused = false;
        s.clear_anchors();
        self.shared.transition(&mut s, SessionState::Running);
        self.shared.signal.send_replace(RunSignal::Run);
        drop(s);
        info!(target: "tactile::runtime", "Resumed");
        self.shared.emit(EngineEvent::Resumed);
        Ok(())
    }

    /// Request a cooperative stop. The in-flight primitive completes; the rest of the
    /// tree is abandoned. Also releases a pause.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut s = self.shared.session();
        if !s.state.is_active() {
            return Err(EngineError::InvalidTransition {
                op: "stop",
                state: s.state,
            });
        }
        s.should_stop = true;
        if s.is_paused {
            s.is_paused = false;
            self.shared.transition(&mut s, SessionState::Running);
        }
        self.shared.signal.send_if_modified(|sig| {
            if *sig == RunSignal::Halt {
                return false;
            }
            *sig = RunSignal::Stop;
            true
        });
        drop(s);
        info!(target: "tactile::runtime", "Stop requested");
        Ok(())
    }

    /// Abort at the next suspension point and release every mouse button and modifier,
    /// whatever the current state. Returns how many releases failed.
    pub fn emergency_stop(&self) -> usize {
        {
            let mut s = self.shared.session();
            if s.state.is_active() {
                s.should_stop = true;
                s.is_paused = false;
                self.shared.signal.send_replace(RunSignal::Halt);
            }
        }
        let failures = self.shared.release_all();
        warn!(target: "tactile::runtime", failures, "Emergency stop: input released");
        failures
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.session().snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.shared.session().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Validate and publish new settings. A running walk picks them up before its next
    /// action.
    pub fn update_settings(&self, settings: Settings) -> Result<(), EngineError> {
        validate_settings(&settings).map_err(|e| EngineError::Validation(format!("{e:#}")))?;
        let mut pending = lock(&self.shared.settings);
        pending.version += 1;
        pending.settings = settings;
        debug!(target: "tactile::runtime", version = pending.version, "Settings updated");
        Ok(())
    }
}

/// Interprets workflows against an input device and a screen.
///
/// One run at a time: a second `execute` while one is active fails with
/// [`EngineError::AlreadyRunning`]. Control calls go through [`EngineHandle`] and may come
/// from any task or thread.
pub struct Engine {
    handle: EngineHandle,
    simulator: AsyncMutex<InputSimulator>,
    detector: AsyncMutex<ScreenDetector>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        device: SharedDevice,
        grabber: Box<dyn FrameGrabber>,
        loader: Box<dyn TemplateLoader>,
    ) -> Self {
        let (signal, rx) = watch::channel(RunSignal::Run);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let simulator = InputSimulator::new(device.clone(), &settings, Gate::new(rx.clone()));
        let detector = ScreenDetector::new(grabber, loader, &settings.detection, Gate::new(rx));
        let shared = Arc::new(Shared {
            session: Mutex::new(ExecutionSession::default()),
            signal,
            events,
            device,
            settings: Mutex::new(PendingSettings {
                version: 0,
                settings,
            }),
        });
        Self {
            handle: EngineHandle { shared },
            simulator: AsyncMutex::new(simulator),
            detector: AsyncMutex::new(detector),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.handle.pause()
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.handle.resume()
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.handle.stop()
    }

    pub fn emergency_stop(&self) -> usize {
        self.handle.emergency_stop()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.handle.status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.handle.subscribe()
    }

    pub fn update_settings(&self, settings: Settings) -> Result<(), EngineError> {
        self.handle.update_settings(settings)
    }

    /// Run `workflow` to completion, stop, or failure.
    ///
    /// Returns the terminal error when an action fails without `continueOnError`; the
    /// session is then left in `Error` with the last action index and detection intact.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        opts: ExecuteOptions,
    ) -> Result<RunOutcome, EngineError> {
        validate_workflow(workflow).map_err(|e| EngineError::Validation(format!("{e:#}")))?;
        let shared = &*self.handle.shared;
        {
            let mut s = shared.session();
            if s.state.is_active() {
                return Err(EngineError::AlreadyRunning);
            }
            let previous = s.state;
            s.begin(&workflow.name, opts.dry_run);
            s.state = previous;
            shared.transition(&mut s, SessionState::Running);
            shared.signal.send_replace(RunSignal::Run);
        }

        info!(
            target: "tactile::runtime",
            workflow = %workflow.name,
            actions = workflow.actions.len(),
            loop_count = workflow.loop_count,
            dry_run = opts.dry_run,
            "Starting workflow"
        );
        shared.emit(EngineEvent::Start {
            workflow: workflow.name.clone(),
            loop_count: workflow.loop_count,
            dry_run: opts.dry_run,
        });

        let mut simulator = self.simulator.lock().await;
        let mut detector = self.detector.lock().await;
        let settings = lock(&shared.settings).settings.clone();
        let mut run = Run {
            shared,
            sim: &mut *simulator,
            det: &mut *detector,
            gate: Gate::new(shared.signal.subscribe()),
            dry_run: opts.dry_run,
            settings,
            settings_version: u64::MAX,
            held: Vec::new(),
            loops_completed: 0,
        };
        run.refresh_settings();
        let result = run.run_workflow(workflow).await;
        run.release_held();
        let loops_completed = run.loops_completed;
        drop(run);
        drop(detector);
        drop(simulator);

        let halted = *shared.signal.borrow() == RunSignal::Halt;
        if halted {
            // Anything pressed while the walk unwound.
            shared.release_all();
        }

        let mut s = shared.session();
        let actions_executed = s.actions_executed;
        let outcome = match result {
            Ok(()) | Err(EngineError::Halted) if s.should_stop || halted => {
                shared.transition(&mut s, SessionState::Stopped);
                info!(
                    target: "tactile::runtime",
                    workflow = %workflow.name, emergency = halted, "Workflow stopped"
                );
                shared.emit(EngineEvent::Stopped {
                    workflow: workflow.name.clone(),
                    emergency: halted,
                });
                Ok(RunOutcome {
                    status: RunStatus::Stopped,
                    loops_completed,
                    actions_executed,
                    emergency: halted,
                })
            }
            Ok(()) => {
                shared.transition(&mut s, SessionState::Completed);
                info!(
                    target: "tactile::runtime",
                    workflow = %workflow.name, loops = loops_completed, actions = actions_executed,
                    "Workflow completed"
                );
                shared.emit(EngineEvent::Complete {
                    workflow: workflow.name.clone(),
                    loops: loops_completed,
                    actions: actions_executed,
                });
                Ok(RunOutcome {
                    status: RunStatus::Completed,
                    loops_completed,
                    actions_executed,
                    emergency: false,
                })
            }
            Err(e) => {
                error!(
                    target: "tactile::runtime",
                    workflow = %workflow.name, error = %e, "Workflow failed"
                );
                s.last_error = Some(e.to_string());
                shared.transition(&mut s, SessionState::Error);
                shared.emit(EngineEvent::Error {
                    workflow: workflow.name.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        };
        s.is_paused = false;
        shared.signal.send_replace(RunSignal::Run);
        outcome
    }
}

/// One walk of the action tree. Holds the simulator and detector for the whole run.
struct Run<'r> {
    shared: &'r Shared,
    sim: &'r mut InputSimulator,
    det: &'r mut ScreenDetector,
    gate: Gate,
    dry_run: bool,
    settings: Settings,
    settings_version: u64,
    /// Keys left down by `hold` actions, released when the run ends.
    held: Vec<Key>,
    loops_completed: u32,
}

impl Run<'_> {
    fn refresh_settings(&mut self) {
        let pending = lock(&self.shared.settings);
        if pending.version == self.settings_version {
            return;
        }
        self.settings_version = pending.version;
        self.settings = pending.settings.clone();
        drop(pending);
        self.sim.update_settings(&self.settings);
        self.det.update_settings(&self.settings.detection);
        debug!(target: "tactile::runtime", version = self.settings_version, "Applied settings");
    }

    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.held);
        if let Err(e) = self.sim.release_keys(&keys) {
            warn!(target: "tactile::runtime", ?keys, error = %e, "Failed to release held keys");
        }
    }

    async fn run_workflow(&mut self, wf: &Workflow) -> Result<(), EngineError> {
        let total = (wf.loop_count > 0).then_some(wf.loop_count);
        let mut iteration = 0;
        while total.is_none_or(|t| iteration < t) {
            tokio::task::yield_now().await;
            self.gate.checkpoint().await?;
            if self.gate.is_stopping() {
                break;
            }
            iteration += 1;
            self.shared.session().current_loop = iteration;
            self.shared.emit(EngineEvent::LoopStart {
                scope: LoopScope::Workflow,
                path: None,
                iteration,
                total,
            });

            self.walk(&wf.actions, &ActionPath::root(), 0).await?;
            if self.gate.is_stopping() {
                break;
            }
            self.shared.emit(EngineEvent::LoopEnd {
                scope: LoopScope::Workflow,
                path: None,
                iteration,
            });
            self.loops_completed = iteration;

            if total.is_none_or(|t| iteration < t)
                && !self
                    .loop_delay(wf.loop_delay, LoopScope::Workflow, None, iteration)
                    .await?
            {
                break;
            }
        }
        Ok(())
    }

    /// Sleep between iterations. `Ok(false)` when a stop cut it short.
    async fn loop_delay(
        &mut self,
        range: DelayRange,
        scope: LoopScope,
        path: Option<&ActionPath>,
        iteration: u32,
    ) -> Result<bool, EngineError> {
        if range.is_zero() {
            return Ok(true);
        }
        let delay = self.sim.sample_delay(range);
        self.shared.emit(EngineEvent::LoopDelay {
            scope,
            path: path.cloned(),
            iteration,
            delay_ms: delay.as_millis() as u64,
        });
        Ok(self.gate.delay(delay).await?)
    }

    fn walk<'a>(
        &'a mut self,
        actions: &'a [Action],
        parent: &'a ActionPath,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            if depth > MAX_DEPTH {
                return Err(EngineError::Validation(format!(
                    "Maximum action nesting depth ({MAX_DEPTH}) exceeded"
                )));
            }
            for (index, action) in actions.iter().enumerate() {
                self.gate.checkpoint().await?;
                if self.gate.is_stopping() {
                    trace!(target: "tactile::runtime", %parent, index, "Abandoning remaining actions");
                    break;
                }
                let path = parent.child(index);
                self.run_action(action, &path, depth).await?;
            }
            Ok(())
        })
    }

    async fn run_action(
        &mut self,
        action: &Action,
        path: &ActionPath,
        depth: usize,
    ) -> Result<(), EngineError> {
        self.refresh_settings();
        {
            let mut s = self.shared.session();
            s.current_action_index = path.index();
            s.current_path = Some(path.clone());
        }
        let tag = action.tag();
        let container = is_container(&action.kind);

        // Gate (for conditionals the condition picks the branch instead).
        if let Some(condition) = &action.condition
            && !matches!(action.kind, ActionKind::Conditional(_))
            && !self.dry_run
        {
            match self.evaluate(condition, path) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "tactile::runtime", %path, action = tag, "Condition false, skipping");
                    self.shared.emit(EngineEvent::ActionSkipped {
                        path: path.clone(),
                        action: tag,
                    });
                    return Ok(());
                }
                Err(e) => return self.fail(action, path, e, container),
            }
        }

        trace!(target: "tactile::runtime", %path, action = %action.label(), "Executing action");
        self.shared.emit(EngineEvent::ActionStart {
            path: path.clone(),
            action: tag,
            name: action.name.clone(),
        });

        let result = if self.dry_run && !container {
            self.dry_run_step(tag, path).await
        } else {
            self.dispatch(action, path, depth).await
        };
        if let Err(e) = result {
            return self.fail(action, path, e, container);
        }

        self.shared.session().actions_executed += 1;
        self.shared.emit(EngineEvent::ActionComplete {
            path: path.clone(),
            action: tag,
        });

        if let Some(delay) = action.delay
            && !matches!(action.kind, ActionKind::Loop(_))
            && !delay.is_zero()
        {
            let d = self.sim.sample_delay(delay);
            self.gate.delay(d).await?;
        }
        Ok(())
    }

    /// Apply the action's error policy. Only primitives catch their own errors; errors
    /// coming up from nested actions keep unwinding.
    fn fail(
        &self,
        action: &Action,
        path: &ActionPath,
        error: EngineError,
        container: bool,
    ) -> Result<(), EngineError> {
        if matches!(error, EngineError::Halted) || container {
            return Err(error);
        }
        let swallow = matches!(action.on_error, ErrorPolicy::Continue) && error.is_recoverable();
        self.shared.emit(EngineEvent::ActionError {
            path: path.clone(),
            action: action.tag(),
            message: error.to_string(),
            continued: swallow,
        });
        if swallow {
            warn!(
                target: "tactile::runtime",
                %path, action = %action.label(), error = %error, "Action failed, continuing"
            );
            Ok(())
        } else {
            Err(error)
        }
    }

    async fn dry_run_step(&mut self, tag: &'static str, path: &ActionPath) -> Result<(), EngineError> {
        info!(target: "tactile::runtime", %path, action = tag, "DRY-RUN");
        self.shared.emit(EngineEvent::ActionDryRun {
            path: path.clone(),
            action: tag,
        });
        let step = Duration::from_millis(self.settings.engine.dry_run_step_ms);
        self.gate.delay(step).await?;
        Ok(())
    }

    async fn dispatch(
        &mut self,
        action: &Action,
        path: &ActionPath,
        depth: usize,
    ) -> Result<(), EngineError> {
        match &action.kind {
            ActionKind::MouseMove(m) => self.mouse_move(m, path).await,
            ActionKind::MouseClick(c) => self.mouse_click(c, path).await,
            ActionKind::Keyboard(k) => self.keyboard(action, k, path, depth).await,
            ActionKind::Wait(w) => self.wait(w, path).await,
            ActionKind::Conditional(c) => {
                self.conditional(action.condition.as_ref(), c, path, depth)
                    .await
            }
            ActionKind::Loop(l) => self.run_loop(l, action.delay, path, depth).await,
            ActionKind::ImageDetect(d) => self.image_detect(d, path).await,
            ActionKind::PixelDetect(d) => self.pixel_detect(d, path).await,
        }
    }

    // --- pointer ---

    async fn mouse_move(&mut self, m: &MouseMoveAction, path: &ActionPath) -> Result<(), EngineError> {
        let Some((x, y)) = self.resolve_target(&m.target, path)? else {
            return Err(EngineError::Validation("Mouse move has no target".into()));
        };
        let opts = MoveOptions {
            duration: m.duration,
            overshoot: m.overshoot,
        };
        self.sim.move_to(x, y, opts).await?;
        Ok(())
    }

    async fn mouse_click(
        &mut self,
        c: &MouseClickAction,
        path: &ActionPath,
    ) -> Result<(), EngineError> {
        let at = match self.resolve_target(&c.target, path)? {
            Some(point) => point,
            None => self.anchor(path)?,
        };
        let clicked = self
            .sim
            .click(c.button, c.click_type, Some(at), c.jitter.unwrap_or(true))
            .await?;
        debug!(target: "tactile::runtime", %path, button = ?c.button, ?clicked, "Clicked");
        Ok(())
    }

    /// The pointer position captured the first time this action ran since the last resume.
    fn anchor(&mut self, path: &ActionPath) -> Result<(i32, i32), EngineError> {
        let existing = self.shared.session().anchor(path);
        if let Some(point) = existing {
            return Ok(point);
        }
        let point = self.sim.position()?;
        trace!(target: "tactile::runtime", %path, ?point, "Captured click anchor");
        self.shared.session().set_anchor(path.clone(), point);
        Ok(point)
    }

    fn resolve_target(
        &mut self,
        target: &PointerTarget,
        path: &ActionPath,
    ) -> Result<Option<(i32, i32)>, EngineError> {
        if target.is_unset() {
            return Ok(None);
        }
        match target.mode() {
            MoveMode::Point => Ok(target.x.zip(target.y)),
            MoveMode::Bounds => {
                let rect = target.bounds.ok_or_else(|| {
                    EngineError::Validation("moveMode 'bounds' requires `bounds`".into())
                })?;
                Ok(Some(self.sim.random_point_in(rect)))
            }
            MoveMode::Image => {
                let area = match &target.image_id {
                    Some(id) => match self.det.find_image(id, ImageQuery::default())? {
                        Some(found) => {
                            let detection = Detection::Image(found);
                            self.record(path, detection);
                            detection.area()
                        }
                        None => {
                            self.not_found(path, format!("image '{id}'"));
                            return Err(EngineError::NotFound(format!("image '{id}'")));
                        }
                    },
                    None => {
                        let last = self.shared.session().last_detection;
                        last.ok_or_else(|| {
                            EngineError::NotFound("no detection result to move relative to".into())
                        })?
                        .area()
                    }
                };
                Ok(Some(self.sim.random_point_in(area)))
            }
        }
    }

    // --- keyboard ---

    async fn keyboard(
        &mut self,
        action: &Action,
        k: &KeyboardAction,
        path: &ActionPath,
        depth: usize,
    ) -> Result<(), EngineError> {
        match k.mode {
            KeyboardMode::Type => {
                self.sim.type_text(k.text.as_deref().unwrap_or_default()).await?;
            }
            KeyboardMode::Press => {
                let keys = combo(k)?;
                let count = k.count.unwrap_or(1).max(1);
                let gap = DelayRange::new(
                    self.settings.typing.min_delay,
                    self.settings.typing.max_delay,
                );
                for i in 0..count {
                    self.sim.press_combo(&keys).await?;
                    if i + 1 < count {
                        let d = self.sim.sample_delay(gap);
                        self.gate.pace(d).await?;
                    }
                }
            }
            KeyboardMode::Hold => {
                let keys = combo(k)?;
                for key in &keys {
                    if !self.held.contains(key) {
                        self.held.push(*key);
                    }
                }
                self.sim.hold_keys(&keys).await?;
            }
            KeyboardMode::Release => {
                let keys = combo(k)?;
                self.sim.release_keys(&keys)?;
                self.held.retain(|key| !keys.contains(key));
            }
            KeyboardMode::HoldAndAct => {
                let keys = combo(k)?;
                if self.dry_run {
                    return self.walk(&k.actions, path, depth + 1).await;
                }
                // The hold is this action's own step: its error policy applies here, before
                // the nested actions run.
                if let Err(e) = self.sim.hold_keys(&keys).await {
                    if let Err(release) = self.sim.release_keys(&keys) {
                        warn!(
                            target: "tactile::runtime",
                            %path, error = %release, "Release after failed hold"
                        );
                    }
                    return self.fail(action, path, e.into(), false);
                }
                let result = self.walk(&k.actions, path, depth + 1).await;
                // Keys come up whatever happened inside.
                let released = self.sim.release_keys(&keys);
                result?;
                released?;
            }
        }
        Ok(())
    }

    // --- waits ---

    async fn wait(&mut self, w: &WaitAction, path: &ActionPath) -> Result<(), EngineError> {
        let Some(target) = w.wait_for else {
            let range = w
                .duration
                .map(|d| d.range())
                .ok_or_else(|| EngineError::Validation("Wait requires `duration`".into()))?;
            let total = self.sim.sample_delay(range);
            return self.countdown(total, path).await;
        };

        let poll = PollOptions {
            interval: w.interval.map(Duration::from_millis),
            timeout: w.timeout.map(Duration::from_millis),
        };
        let timeout_ms = w.timeout.unwrap_or(self.settings.detection.timeout_ms);
        let appear = w.until == WaitUntil::Appear;

        let (what, outcome) = match target {
            WaitTarget::Image => {
                let id = w.image_id.as_deref().ok_or_else(|| {
                    EngineError::Validation("Waiting for an image requires `imageId`".into())
                })?;
                let query = ImageQuery {
                    confidence: w.confidence,
                    region: w.region,
                    scale_down: None,
                };
                let outcome = if appear {
                    self.det
                        .wait_for_image(id, query, poll)
                        .await?
                        .map(|r| Some(Detection::Image(r)))
                } else {
                    self.det.wait_for_image_gone(id, query, poll).await?.map(|()| None)
                };
                (format!("image '{id}'"), outcome)
            }
            WaitTarget::Pixel => {
                let color = w.color.ok_or_else(|| {
                    EngineError::Validation("Waiting for a pixel requires `color`".into())
                })?;
                let query = PixelQuery {
                    tolerance: w.tolerance,
                    region: w.region,
                };
                let outcome = if appear {
                    self.det
                        .wait_for_pixel(color, query, poll)
                        .await?
                        .map(|p| Some(Detection::Pixel(p)))
                } else {
                    self.det.wait_for_pixel_gone(color, query, poll).await?.map(|()| None)
                };
                (format!("pixel {},{},{}", color.r, color.g, color.b), outcome)
            }
        };

        match outcome {
            WaitOutcome::Found(Some(detection)) => self.record(path, detection),
            WaitOutcome::Found(None) | WaitOutcome::Stopped => {}
            WaitOutcome::TimedOut => {
                if appear {
                    self.not_found(path, what.clone());
                }
                if w.fail_on_timeout {
                    let what = if appear { what } else { format!("{what} to disappear") };
                    return Err(EngineError::Timeout { what, timeout_ms });
                }
            }
        }
        Ok(())
    }

    /// Tick through `total`, reporting progress. Time spent paused does not count.
    async fn countdown(&mut self, total: Duration, path: &ActionPath) -> Result<(), EngineError> {
        let total_ms = total.as_millis() as u64;
        let tick = Duration::from_millis(self.settings.engine.wait_tick_ms.max(1));
        self.shared.emit(EngineEvent::WaitStart {
            path: path.clone(),
            duration: total_ms,
        });

        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            if self.gate.is_halted() {
                return Err(EngineError::Halted);
            }
            if self.gate.is_stopping() {
                break;
            }
            if self.gate.is_paused() {
                self.tick(path, total, elapsed, true);
                self.gate.checkpoint().await?;
                continue;
            }
            let step = tick.min(total - elapsed);
            let started = Instant::now();
            tokio::select! {
                _ = sleep(step) => {}
                _ = self.gate.changed() => {}
            }
            elapsed += started.elapsed().min(step);
            self.tick(path, total, elapsed, false);
        }
        Ok(())
    }

    fn tick(&self, path: &ActionPath, total: Duration, elapsed: Duration, paused: bool) {
        let (total_ms, elapsed_ms) = (total.as_millis() as u64, elapsed.as_millis() as u64);
        self.shared.emit(EngineEvent::WaitTick {
            path: path.clone(),
            duration: total_ms,
            remaining: total_ms.saturating_sub(elapsed_ms),
            elapsed: elapsed_ms,
            paused,
        });
    }

    // --- control flow ---

    async fn conditional(
        &mut self,
        condition: Option<&Condition>,
        c: &ConditionalAction,
        path: &ActionPath,
        depth: usize,
    ) -> Result<(), EngineError> {
        let take_then = match condition {
            _ if self.dry_run => true,
            Some(cond) => self.evaluate(cond, path)?,
            None => {
                return Err(EngineError::Validation(
                    "Conditional requires a `condition`".into(),
                ));
            }
        };
        // Branches get their own path segment (0 = then, 1 = else).
        let (branch, segment, label) = if take_then {
            (&c.then_actions, 0, "then")
        } else {
            (&c.else_actions, 1, "else")
        };
        debug!(target: "tactile::runtime", %path, branch = label, "Conditional");
        self.walk(branch, &path.child(segment), depth + 1).await
    }

    async fn run_loop(
        &mut self,
        l: &LoopAction,
        delay: Option<DelayRange>,
        path: &ActionPath,
        depth: usize,
    ) -> Result<(), EngineError> {
        let total = if l.infinite {
            None
        } else {
            Some(l.count.unwrap_or(0))
        };
        let mut iteration = 0;
        while total.is_none_or(|t| iteration < t) {
            tokio::task::yield_now().await;
            self.gate.checkpoint().await?;
            if self.gate.is_stopping() {
                break;
            }
            iteration += 1;
            self.shared.emit(EngineEvent::LoopStart {
                scope: LoopScope::Action,
                path: Some(path.clone()),
                iteration,
                total,
            });
            self.walk(&l.actions, path, depth + 1).await?;
            if self.gate.is_stopping() {
                break;
            }
            self.shared.emit(EngineEvent::LoopEnd {
                scope: LoopScope::Action,
                path: Some(path.clone()),
                iteration,
            });
            if let Some(range) = delay
                && total.is_none_or(|t| iteration < t)
                && !self
                    .loop_delay(range, LoopScope::Action, Some(path), iteration)
                    .await?
            {
                break;
            }
        }
        Ok(())
    }

    // --- detection ---

    fn evaluate(&mut self, condition: &Condition, path: &ActionPath) -> Result<bool, EngineError> {
        let found = match condition.kind {
            ConditionKind::ImagePresent | ConditionKind::ImageAbsent => {
                let id = condition.image_id.as_deref().ok_or_else(|| {
                    EngineError::Validation("Image conditions require `imageId`".into())
                })?;
                let query = ImageQuery {
                    confidence: condition.confidence,
                    region: condition.region,
                    scale_down: None,
                };
                let hit = self.det.find_image(id, query)?;
                if let Some(r) = hit {
                    self.record(path, Detection::Image(r));
                }
                hit.is_some()
            }
            ConditionKind::PixelMatch => {
                let color = condition.color.ok_or_else(|| {
                    EngineError::Validation("Pixel conditions require `color`".into())
                })?;
                let query = PixelQuery {
                    tolerance: condition.tolerance,
                    region: condition.region,
                };
                let hit = self.det.find_pixel(color, query)?;
                if let Some(p) = hit {
                    self.record(path, Detection::Pixel(p));
                }
                hit.is_some()
            }
        };
        let result = match condition.kind {
            ConditionKind::ImageAbsent => !found,
            _ => found,
        };
        debug!(target: "tactile::runtime", %path, kind = ?condition.kind, result, "Condition evaluated");
        Ok(result)
    }

    async fn image_detect(
        &mut self,
        d: &ImageDetectAction,
        path: &ActionPath,
    ) -> Result<(), EngineError> {
        let query = ImageQuery {
            confidence: d.confidence,
            region: d.region,
            scale_down: d.scale_down,
        };
        let found = if d.wait_until_found {
            let poll = PollOptions {
                interval: d.poll_interval.map(Duration::from_millis),
                timeout: d.timeout.map(Duration::from_millis),
            };
            match self.det.wait_for_image(&d.image_id, query, poll).await? {
                WaitOutcome::Found(r) => Some(r),
                WaitOutcome::Stopped => return Ok(()),
                WaitOutcome::TimedOut => None,
            }
        } else {
            self.det.find_image(&d.image_id, query)?
        };

        match found {
            Some(r) => {
                self.record(path, Detection::Image(r));
                Ok(())
            }
            None => {
                let what = format!("image '{}'", d.image_id);
                self.not_found(path, what.clone());
                if d.fail_on_not_found {
                    Err(EngineError::NotFound(what))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn pixel_detect(
        &mut self,
        d: &PixelDetectAction,
        path: &ActionPath,
    ) -> Result<(), EngineError> {
        let query = PixelQuery {
            tolerance: d.tolerance,
            region: d.region,
        };
        let found = if d.wait_until_found {
            let poll = PollOptions {
                interval: d.poll_interval.map(Duration::from_millis),
                timeout: d.timeout.map(Duration::from_millis),
            };
            match self.det.wait_for_pixel(d.color, query, poll).await? {
                WaitOutcome::Found(p) => Some(p),
                WaitOutcome::Stopped => return Ok(()),
                WaitOutcome::TimedOut => None,
            }
        } else {
            self.det.find_pixel(d.color, query)?
        };

        match found {
            Some(p) => {
                self.record(path, Detection::Pixel(p));
                Ok(())
            }
            None => {
                let what = format!("pixel {},{},{}", d.color.r, d.color.g, d.color.b);
                self.not_found(path, what.clone());
                if d.fail_on_not_found {
                    Err(EngineError::NotFound(what))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn record(&self, path: &ActionPath, detection: Detection) {
        self.shared.session().last_detection = Some(detection);
        self.shared.emit(EngineEvent::DetectionFound {
            path: path.clone(),
            detection,
        });
    }

    fn not_found(&self, path: &ActionPath, target: String) {
        debug!(target: "tactile::runtime", %path, %target, "Not found");
        self.shared.emit(EngineEvent::DetectionNotFound {
            path: path.clone(),
            target,
        });
    }
}

/// Actions that walk nested lists rather than touching the device themselves.
fn is_container(kind: &ActionKind) -> bool {
    match kind {
        ActionKind::Conditional(_) | ActionKind::Loop(_) => true,
        ActionKind::Keyboard(k) => k.mode == KeyboardMode::HoldAndAct,
        _ => false,
    }
}

fn combo(k: &KeyboardAction) -> Result<Vec<Key>, EngineError> {
    let key = k
        .key
        .as_deref()
        .ok_or_else(|| EngineError::Validation("Keyboard action requires `key`".into()))?;
    Ok(parse_combo(key)?)
}
