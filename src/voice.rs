//! The voice agent: a live audio conversation whose tool calls drive the UI
//! through the command bus.

use crate::bus::CommandBus;
use crate::error::AgentError;
use crate::live::{LiveConfig, LiveConnector};
use crate::types::live::Setup;
use crate::types::tools::site_control_tools;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod audio;
mod session;
pub mod tools;

pub use audio::{AudioBackend, CaptureStream, PlaybackSink};
#[cfg(feature = "native")]
pub use audio::NativeAudio;

/// How long the speaking indicator outlives a completed model turn.
pub const SPEAKING_GRACE: Duration = Duration::from_millis(800);

pub const SYSTEM_INSTRUCTION: &str = "You are the advanced AI core of the Clouds Gadgets website. \
You have full control over the UI. You can navigate, scroll, change themes, and adjust colors. \
Be concise, futuristic, and helpful. When asked to change a page, execute the navigate tool.";

const START_FAILED: &str = "Failed to start AI";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Speaking,
}

impl VoiceState {
    pub fn is_active(&self) -> bool {
        !matches!(self, VoiceState::Idle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceStatus {
    pub state: VoiceState,
    /// Last user-visible failure. Cleared by the next start.
    pub error: Option<String>,
}

/// The setup frame for a site-control session: audio replies in the
/// configured voice, the four UI tools and the site persona.
pub fn site_setup(config: &LiveConfig) -> Setup {
    Setup::builder(config.model())
        .with_voice(config.voice())
        .with_instructions(SYSTEM_INSTRUCTION)
        .with_tools(site_control_tools())
        .build()
}

struct ActiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct VoiceAgent {
    bus: CommandBus,
    connector: Arc<dyn LiveConnector>,
    audio: Arc<dyn AudioBackend>,
    setup: Setup,
    status: Arc<watch::Sender<VoiceStatus>>,
    active: Option<ActiveSession>,
}

impl VoiceAgent {
    pub fn new<C, A>(bus: CommandBus, connector: C, audio: A) -> Self
    where
        C: LiveConnector + 'static,
        A: AudioBackend + 'static,
    {
        let (status, _) = watch::channel(VoiceStatus::default());
        Self {
            bus,
            connector: Arc::new(connector),
            audio: Arc::new(audio),
            setup: site_setup(&LiveConfig::new()),
            status: Arc::new(status),
            active: None,
        }
    }

    pub fn with_setup(mut self, setup: Setup) -> Self {
        self.setup = setup;
        self
    }

    pub fn status(&self) -> VoiceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceStatus> {
        self.status.subscribe()
    }

    /// Whether a session task is still running.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Acquires the microphone and speaker, opens the live session and hands
    /// both to a session task. A no-op while a session is running.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        if self.is_active() {
            tracing::debug!("voice session already running");
            return Ok(());
        }
        self.active = None;
        self.status.send_replace(VoiceStatus {
            state: VoiceState::Connecting,
            error: None,
        });

        let mut capture = match self.audio.open_microphone() {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!("failed to open microphone: {}", e);
                self.fail(e.user_message());
                return Err(e);
            }
        };

        let mut playback = match self.audio.open_speaker() {
            Ok(playback) => playback,
            Err(e) => {
                capture.stop();
                return Err(self.start_failed(e));
            }
        };

        let channels = match self.connector.connect(self.setup.clone()).await {
            Ok(channels) => channels,
            Err(e) => {
                capture.stop();
                playback.close();
                return Err(self.start_failed(e));
            }
        };

        let frames = capture.take_frames();
        let (client_tx, server_rx, connection) = channels.into_parts();
        let session = session::Session::new(
            self.bus.clone(),
            client_tx,
            capture,
            playback,
            self.status.clone(),
        )
        .map_err(|e| self.start_failed(e))?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(session::run(
            session,
            server_rx,
            frames,
            connection,
            cancel.clone(),
        ));
        self.active = Some(ActiveSession { cancel, handle });
        tracing::info!("voice session connecting");
        Ok(())
    }

    /// Ends the session and waits until the microphone and speaker are released.
    /// Safe to call at any time, any number of times.
    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                tracing::error!("voice session task failed: {}", e);
            }
        }
        self.status.send_if_modified(|status| {
            let changed = status.state != VoiceState::Idle;
            status.state = VoiceState::Idle;
            changed
        });
    }

    /// The voice button: starts when idle, stops otherwise.
    pub async fn toggle(&mut self) -> Result<(), AgentError> {
        if self.is_active() {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    fn fail(&self, message: &str) {
        self.status.send_replace(VoiceStatus {
            state: VoiceState::Idle,
            error: Some(message.to_string()),
        });
    }

    fn start_failed(&self, e: anyhow::Error) -> AgentError {
        tracing::error!("failed to start voice session: {:#}", e);
        self.fail(START_FAILED);
        AgentError::Transport(format!("{e:#}"))
    }
}

impl Drop for VoiceAgent {
    fn drop(&mut self) {
        // The task releases the devices itself once cancelled.
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{ClientTx, LiveChannels, LiveEvent};
    use crate::types::live::{ClientMessage, ServerMessage};
    use crate::types::{Command, CommandKind};
    use crate::utils::audio::{encode_f32, CAPTURE_FRAME_SIZE, INPUT_PCM16_SAMPLE_RATE};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, Default)]
    struct DeviceLog {
        deny_microphone: bool,
        microphone_open: bool,
        microphone_stops: usize,
        resumed: bool,
        speaker_closes: usize,
        clears: usize,
        flushes: usize,
        clock: f64,
        played: Vec<(f64, usize)>,
    }

    #[derive(Clone, Default)]
    struct FakeAudio {
        log: Arc<Mutex<DeviceLog>>,
        frames_tx: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    }

    impl FakeAudio {
        fn log(&self) -> std::sync::MutexGuard<'_, DeviceLog> {
            self.log.lock().unwrap()
        }

        async fn speak_into_microphone(&self, samples: Vec<f32>) {
            let tx = self.frames_tx.lock().unwrap().clone().unwrap();
            tx.send(samples).await.unwrap();
        }
    }

    struct FakeCapture {
        log: Arc<Mutex<DeviceLog>>,
        frames: Option<mpsc::Receiver<Vec<f32>>>,
    }

    impl CaptureStream for FakeCapture {
        fn sample_rate(&self) -> u32 {
            INPUT_PCM16_SAMPLE_RATE
        }
        fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
            self.frames.take()
        }
        fn resume(&mut self) {
            self.log.lock().unwrap().resumed = true;
        }
        fn stop(&mut self) {
            let mut log = self.log.lock().unwrap();
            if log.microphone_open {
                log.microphone_open = false;
                log.microphone_stops += 1;
            }
        }
    }

    struct FakePlayback {
        log: Arc<Mutex<DeviceLog>>,
        closed: bool,
    }

    impl PlaybackSink for FakePlayback {
        fn now(&self) -> f64 {
            self.log.lock().unwrap().clock
        }
        fn play_at(&mut self, start: f64, samples: &[f32]) {
            self.log.lock().unwrap().played.push((start, samples.len()));
        }
        fn flush(&mut self) {
            self.log.lock().unwrap().flushes += 1;
        }
        fn clear(&mut self) {
            self.log.lock().unwrap().clears += 1;
        }
        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.log.lock().unwrap().speaker_closes += 1;
            }
        }
    }

    impl AudioBackend for FakeAudio {
        fn open_microphone(&self) -> Result<Box<dyn CaptureStream>, AgentError> {
            let mut log = self.log.lock().unwrap();
            if log.deny_microphone {
                return Err(AgentError::PermissionDenied("NotAllowedError".to_string()));
            }
            log.microphone_open = true;
            let (tx, rx) = mpsc::channel(16);
            *self.frames_tx.lock().unwrap() = Some(tx);
            Ok(Box::new(FakeCapture {
                log: self.log.clone(),
                frames: Some(rx),
            }))
        }

        fn open_speaker(&self) -> anyhow::Result<Box<dyn PlaybackSink>> {
            Ok(Box::new(FakePlayback {
                log: self.log.clone(),
                closed: false,
            }))
        }
    }

    /// The far end of a fake live session.
    struct Remote {
        client_rx: mpsc::Receiver<ClientMessage>,
        server_tx: mpsc::Sender<LiveEvent>,
        // Keeps the session's sender alive even if the agent drops its clone.
        _client_tx: ClientTx,
    }

    impl Remote {
        async fn push(&self, message: serde_json::Value) {
            let message: ServerMessage = serde_json::from_value(message).unwrap();
            self.server_tx.send(LiveEvent::Message(message)).await.unwrap();
        }

        async fn next_json(&mut self) -> serde_json::Value {
            let message = timeout(WAIT, self.client_rx.recv()).await.unwrap().unwrap();
            serde_json::to_value(message).unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        refuse: bool,
        setups: Arc<Mutex<Vec<Setup>>>,
        remote: Arc<Mutex<Option<Remote>>>,
    }

    impl FakeConnector {
        fn remote(&self) -> Remote {
            self.remote.lock().unwrap().take().unwrap()
        }
    }

    #[async_trait]
    impl LiveConnector for FakeConnector {
        async fn connect(&self, setup: Setup) -> anyhow::Result<LiveChannels> {
            if self.refuse {
                anyhow::bail!("connection refused");
            }
            self.setups.lock().unwrap().push(setup);
            let (client_tx, client_rx) = mpsc::channel(64);
            let (server_tx, server_rx) = mpsc::channel(64);
            *self.remote.lock().unwrap() = Some(Remote {
                client_rx,
                server_tx,
                _client_tx: client_tx.clone(),
            });
            Ok(LiveChannels::detached(client_tx, server_rx))
        }
    }

    fn agent(bus: &CommandBus, connector: &FakeConnector, audio: &FakeAudio) -> VoiceAgent {
        VoiceAgent::new(bus.clone(), connector.clone(), audio.clone())
    }

    async fn wait_for(agent: &VoiceAgent, f: impl FnMut(&VoiceStatus) -> bool) {
        let mut rx = agent.subscribe();
        timeout(WAIT, rx.wait_for(f)).await.unwrap().unwrap();
    }

    fn audio_message(chunks: &[usize]) -> serde_json::Value {
        let parts: Vec<_> = chunks
            .iter()
            .map(|n| json!({"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": encode_f32(&vec![0.25; *n])}}))
            .collect();
        json!({"serverContent": {"modelTurn": {"parts": parts}}})
    }

    #[test]
    fn session_task_can_move_between_threads() {
        fn assert_send<T: Send>(_: &T) {}

        let audio = FakeAudio::default();
        let mut capture = audio.open_microphone().unwrap();
        let frames = capture.take_frames();
        let playback = audio.open_speaker().unwrap();
        let (client_tx, _client_rx) = mpsc::channel(1);
        let (_server_tx, server_rx) = mpsc::channel(1);
        let (status, _) = watch::channel(VoiceStatus::default());
        let session = session::Session::new(
            CommandBus::new(),
            client_tx,
            capture,
            playback,
            Arc::new(status),
        )
        .unwrap();

        let task = session::run(session, server_rx, frames, None, CancellationToken::new());
        assert_send(&task);
    }

    #[tokio::test]
    async fn session_opens_with_site_tools_and_streams_after_setup() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);

        agent.start().await.unwrap();
        assert_eq!(agent.status().state, VoiceState::Connecting);
        assert!(!audio.log().resumed);

        let setups = connector.setups.lock().unwrap().clone();
        assert_eq!(setups.len(), 1);
        let names: Vec<_> = setups[0].function_declarations().map(|d| d.name().to_string()).collect();
        assert_eq!(names, ["navigate", "changeTheme", "toggleAutoScroll", "setAccentColor"]);

        let mut remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;
        wait_for(&agent, |s| s.state == VoiceState::Listening).await;
        assert!(audio.log().resumed);

        audio.speak_into_microphone(vec![0.1; CAPTURE_FRAME_SIZE]).await;
        let sent = remote.next_json().await;
        assert_eq!(
            sent["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );

        agent.stop().await;
    }

    #[tokio::test]
    async fn every_tool_call_is_acknowledged() {
        let bus = CommandBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _nav = bus.subscribe(CommandKind::Navigate, move |c| {
            sink.lock().unwrap().push(c.clone());
            Ok(())
        });
        let _accent = bus.subscribe(CommandKind::SetAccentColor, |_| anyhow::bail!("no root"));

        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let mut remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;

        remote
            .push(json!({"toolCall": {"functionCalls": [
                {"id": "a", "name": "navigate", "args": {"page": "contact"}},
                {"id": "b", "name": "setAccentColor", "args": {"color": "red"}},
                {"id": "c", "name": "selfDestruct", "args": {}}
            ]}}))
            .await;

        let mut results = Vec::new();
        for _ in 0..3 {
            let sent = remote.next_json().await;
            let response = &sent["toolResponse"]["functionResponses"][0];
            results.push((
                response["id"].as_str().unwrap().to_string(),
                response["response"]["result"].as_str().unwrap().to_string(),
            ));
        }
        assert_eq!(
            results,
            [
                ("a".to_string(), "Success".to_string()),
                ("b".to_string(), "Failed".to_string()),
                ("c".to_string(), "Failed".to_string()),
            ]
        );
        assert_eq!(*seen.lock().unwrap(), vec![Command::navigate("contact")]);
        assert_eq!(agent.status().state, VoiceState::Listening);

        agent.stop().await;
    }

    #[tokio::test]
    async fn inbound_audio_is_scheduled_back_to_back() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        audio.log().clock = 2.0;
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;

        // 0.1 s and 0.05 s of 24 kHz audio arriving in one burst.
        remote.push(audio_message(&[2400, 1200])).await;
        wait_for(&agent, |s| s.state == VoiceState::Speaking).await;
        remote.push(audio_message(&[2400])).await;
        timeout(WAIT, async {
            while audio.log().played.len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let played = audio.log().played.clone();
        let starts: Vec<f64> = played.iter().map(|(start, _)| *start).collect();
        assert!((starts[0] - 2.0).abs() < 1e-9);
        assert!((starts[1] - 2.1).abs() < 1e-9);
        assert!((starts[2] - 2.15).abs() < 1e-9);

        agent.stop().await;
    }

    #[tokio::test]
    async fn interruption_drops_queued_audio() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;

        remote.push(audio_message(&[2400, 2400])).await;
        remote
            .push(json!({"serverContent": {"interrupted": true}}))
            .await;
        remote.push(audio_message(&[2400])).await;
        timeout(WAIT, async {
            while audio.log().played.len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let log = audio.log();
        assert_eq!(log.clears, 1);
        // Restarts at the clock instead of after the discarded 0.2 s.
        assert_eq!(log.played[2].0, 0.0);
        drop(log);

        agent.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_lingers_after_turn_complete() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;
        remote.push(audio_message(&[480])).await;
        wait_for(&agent, |s| s.state == VoiceState::Speaking).await;

        let before = tokio::time::Instant::now();
        remote
            .push(json!({"serverContent": {"turnComplete": true}}))
            .await;
        tokio::task::yield_now().await;
        assert_eq!(agent.status().state, VoiceState::Speaking);
        assert_eq!(audio.log().flushes, 1);

        wait_for(&agent, |s| s.state == VoiceState::Listening).await;
        assert!(before.elapsed() >= SPEAKING_GRACE);

        agent.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_devices() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let _remote = connector.remote();

        agent.stop().await;
        agent.stop().await;

        let log = audio.log();
        assert!(!log.microphone_open);
        assert_eq!(log.microphone_stops, 1);
        assert_eq!(log.speaker_closes, 1);
        drop(log);
        assert_eq!(agent.status(), VoiceStatus::default());
        assert!(!agent.is_active());
    }

    #[tokio::test]
    async fn dropping_the_agent_releases_devices() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;
        wait_for(&agent, |s| s.state == VoiceState::Listening).await;
        let mut status = agent.subscribe();

        drop(agent);

        // The task sets Idle only after both devices are released.
        timeout(WAIT, status.wait_for(|s| s.state == VoiceState::Idle))
            .await
            .unwrap()
            .unwrap();
        let log = audio.log();
        assert!(!log.microphone_open);
        assert_eq!(log.microphone_stops, 1);
        assert_eq!(log.speaker_closes, 1);
    }

    #[tokio::test]
    async fn transport_error_surfaces_and_releases() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let remote = connector.remote();
        remote.push(json!({"setupComplete": {}})).await;

        remote
            .server_tx
            .send(LiveEvent::Error("connection reset".to_string()))
            .await
            .unwrap();
        wait_for(&agent, |s| s.state == VoiceState::Idle).await;

        assert_eq!(agent.status().error.as_deref(), Some("Connection Error"));
        let log = audio.log();
        assert!(!log.microphone_open);
        assert_eq!(log.speaker_closes, 1);
        drop(log);

        // A stop racing the teardown is harmless, and the next start clears the error.
        agent.stop().await;
        agent.toggle().await.unwrap();
        assert_eq!(agent.status().error, None);
        assert!(agent.is_active());
        agent.toggle().await.unwrap();
        assert!(!agent.is_active());
    }

    #[tokio::test]
    async fn server_close_returns_to_idle_without_error() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        let mut agent = agent(&bus, &connector, &audio);
        agent.start().await.unwrap();
        let remote = connector.remote();
        remote.server_tx.send(LiveEvent::Closed(None)).await.unwrap();

        wait_for(&agent, |s| s.state == VoiceState::Idle).await;
        assert_eq!(agent.status().error, None);
        assert_eq!(audio.log().speaker_closes, 1);
    }

    #[tokio::test]
    async fn denied_microphone_never_connects() {
        let bus = CommandBus::new();
        let (connector, audio) = (FakeConnector::default(), FakeAudio::default());
        audio.log().deny_microphone = true;
        let mut agent = agent(&bus, &connector, &audio);

        let err = agent.start().await.unwrap_err();
        assert!(matches!(err, AgentError::PermissionDenied(_)));
        assert_eq!(
            agent.status(),
            VoiceStatus {
                state: VoiceState::Idle,
                error: Some("Microphone access denied".to_string()),
            }
        );
        assert!(connector.setups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_connect_releases_devices() {
        let bus = CommandBus::new();
        let connector = FakeConnector {
            refuse: true,
            ..FakeConnector::default()
        };
        let audio = FakeAudio::default();
        let mut agent = agent(&bus, &connector, &audio);

        assert!(agent.start().await.is_err());
        assert_eq!(agent.status().error.as_deref(), Some("Failed to start AI"));
        assert_eq!(agent.status().state, VoiceState::Idle);
        let log = audio.log();
        assert!(!log.microphone_open);
        assert_eq!(log.speaker_closes, 1);
    }
}
