//! Section-aware auto scrolling.
//!
//! Geometry comes from a [`LayoutProbe`], so the stepping logic in
//! [`AutoScroll`] runs the same against a real surface or a test page.

use crate::bus::{CommandBus, Subscription};
use crate::types::{Command, CommandKind, ScrollAction};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One animation frame at 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Pause after each completed step inside a stepped section.
pub const STEP_PAUSE: Duration = Duration::from_millis(1000);

const SHOWCASE_SPEED: f64 = 35.0;
const SHOWCASE_STEP_VIEWPORTS: f64 = 1.5;
const ABOUT_SPEED: f64 = 20.0;
const ABOUT_STEP_VIEWPORTS: f64 = 0.8;
const NORMAL_SPEED: f64 = 8.0;

/// The pinned section counts as active while its top is at the viewport edge...
const PINNED_TOP_MAX: f64 = 0.5;
/// ...and more than this much of it is still on screen.
const MIN_VISIBLE_PX: f64 = 50.0;
const STICKY_TOP_VIEWPORTS: f64 = 0.3;
const STICKY_BOTTOM_VIEWPORTS: f64 = 0.5;
const BOTTOM_TOLERANCE_PX: f64 = 5.0;

/// Viewport-relative bounding box of a landmark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landmark {
    /// The pinned product showcase (measured on its pin spacer when pinned).
    Showcase,
    /// The sticky about section.
    About,
}

pub trait LayoutProbe: Send {
    fn viewport_height(&self) -> f64;
    fn scroll_y(&self) -> f64;
    fn document_height(&self) -> f64;
    fn landmark(&self, landmark: Landmark) -> Option<Rect>;
    fn scroll_by(&mut self, dy: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    Normal,
    Showcase,
    About,
}

impl Section {
    /// Pixels per frame, and the step length in viewports for stepped sections.
    fn pace(&self) -> (f64, Option<f64>) {
        match self {
            Section::Showcase => (SHOWCASE_SPEED, Some(SHOWCASE_STEP_VIEWPORTS)),
            Section::About => (ABOUT_SPEED, Some(ABOUT_STEP_VIEWPORTS)),
            Section::Normal => (NORMAL_SPEED, None),
        }
    }
}

pub fn detect_section<P: LayoutProbe + ?Sized>(probe: &P) -> Section {
    let viewport = probe.viewport_height();
    if let Some(rect) = probe.landmark(Landmark::Showcase) {
        if rect.top <= PINNED_TOP_MAX && rect.bottom > MIN_VISIBLE_PX {
            return Section::Showcase;
        }
    }
    if let Some(rect) = probe.landmark(Landmark::About) {
        if rect.top <= viewport * STICKY_TOP_VIEWPORTS
            && rect.bottom > viewport * STICKY_BOTTOM_VIEWPORTS
        {
            return Section::About;
        }
    }
    Section::Normal
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Not running.
    Stopped,
    /// Inside a post-step pause.
    Waiting,
    Scrolled { section: Section, dy: f64 },
    /// The page bottom was reached; scrolling has stopped itself.
    ReachedBottom,
}

/// The scroll cursor: running flag, current section, progress through the current step.
#[derive(Debug, Default)]
pub struct AutoScroll {
    running: bool,
    section: Section,
    accumulated: f64,
    resume_at: Option<Instant>,
}

impl AutoScroll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.running = true;
        self.accumulated = 0.0;
        self.resume_at = None;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }

    pub fn tick<P: LayoutProbe + ?Sized>(&mut self, probe: &mut P, now: Instant) -> Tick {
        if !self.running {
            return Tick::Stopped;
        }
        if self.resume_at.is_some_and(|at| now < at) {
            return Tick::Waiting;
        }

        let section = detect_section(probe);
        if section != self.section {
            tracing::debug!("auto-scroll entering {:?}", section);
            self.section = section;
            self.accumulated = 0.0;
        }

        let (speed, step) = section.pace();
        probe.scroll_by(speed);
        if let Some(step) = step {
            self.accumulated += speed;
            if self.accumulated >= probe.viewport_height() * step {
                self.resume_at = Some(now + STEP_PAUSE);
                self.accumulated = 0.0;
            }
        }

        if probe.viewport_height() + probe.scroll_y() >= probe.document_height() - BOTTOM_TOLERANCE_PX {
            tracing::info!("auto-scroll reached the bottom of the page");
            self.running = false;
            return Tick::ReachedBottom;
        }
        Tick::Scrolled { section, dy: speed }
    }
}

struct ScrollState {
    scroll: AutoScroll,
    probe: Box<dyn LayoutProbe>,
    frame: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<ScrollState>,
    runtime: tokio::runtime::Handle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ScrollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_running(self: &Arc<Self>, running: bool) {
        let mut state = self.lock();
        if running == state.scroll.is_running() {
            return;
        }
        if running {
            state.scroll.start();
            let shared = self.clone();
            state.frame = Some(self.runtime.spawn(frame_loop(shared)));
            tracing::info!("auto-scroll started");
        } else {
            state.scroll.stop();
            if let Some(frame) = state.frame.take() {
                frame.abort();
            }
            tracing::info!("auto-scroll stopped");
        }
    }
}

async fn frame_loop(shared: Arc<Shared>) {
    let me = tokio::task::id();
    let mut interval = tokio::time::interval(FRAME_INTERVAL);
    loop {
        interval.tick().await;
        let finished = {
            let mut state = shared.lock();
            let ScrollState { scroll, probe, frame } = &mut *state;
            // A stop and restart while we waited for the lock hands the frame to a newer task.
            if frame.as_ref().map(JoinHandle::id) != Some(me) {
                return;
            }
            let finished = matches!(
                scroll.tick(probe.as_mut(), Instant::now()),
                Tick::Stopped | Tick::ReachedBottom
            );
            if finished {
                // Finishing on our own: drop our handle rather than aborting ourselves.
                frame.take();
            }
            finished
        };
        if finished {
            return;
        }
    }
}

/// Owns the auto-scroll cursor and its frame task; reacts to `ai-toggle-scroll`.
pub struct AutoScrollController {
    shared: Arc<Shared>,
    _subscription: Subscription,
}

impl AutoScrollController {
    pub fn attach(
        bus: &CommandBus,
        probe: impl LayoutProbe + 'static,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ScrollState {
                scroll: AutoScroll::new(),
                probe: Box::new(probe),
                frame: None,
            }),
            runtime,
        });
        let handler_shared = shared.clone();
        let subscription = bus.subscribe(CommandKind::ToggleAutoScroll, move |command| {
            if let Command::ToggleAutoScroll(detail) = command {
                handler_shared.set_running(detail.action == ScrollAction::Start);
            }
            Ok(())
        });
        Self {
            shared,
            _subscription: subscription,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().scroll.is_running()
    }

    pub fn section(&self) -> Section {
        self.shared.lock().scroll.section()
    }

    pub fn start(&self) {
        self.shared.set_running(true);
    }

    pub fn stop(&self) {
        self.shared.set_running(false);
    }

    /// The play/pause button.
    pub fn toggle(&self) {
        let running = self.is_running();
        self.shared.set_running(!running);
    }

    pub fn has_frame_task(&self) -> bool {
        self.shared.lock().frame.is_some()
    }
}

impl Drop for AutoScrollController {
    fn drop(&mut self) {
        self.shared.set_running(false);
    }
}
