use crate::bus::CommandBus;
use crate::error::AgentError;
use crate::live::{ClientTx, Connection, LiveEvent, ServerRx};
use crate::types::live::{ClientMessage, RealtimeInput, ServerMessage, ToolResponse};
use crate::utils::audio::{
    decode_f32, duration_of, FrameEncoder, PlaybackCursor, CAPTURE_FRAME_SIZE,
    OUTPUT_PCM16_SAMPLE_RATE,
};
use crate::voice::audio::{CaptureStream, PlaybackSink};
use crate::voice::{tools, VoiceState, VoiceStatus, SPEAKING_GRACE};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why the session loop ended.
#[derive(Debug)]
enum Exit {
    Stopped,
    Closed(Option<String>),
    Failed(AgentError),
}

/// Everything one live voice session owns. Dropping it releases the
/// microphone and the speaker.
pub(super) struct Session {
    bus: CommandBus,
    client_tx: ClientTx,
    capture: Box<dyn CaptureStream>,
    playback: Box<dyn PlaybackSink>,
    encoder: FrameEncoder,
    cursor: PlaybackCursor,
    status: Arc<watch::Sender<VoiceStatus>>,
    open: bool,
}

impl Session {
    pub(super) fn new(
        bus: CommandBus,
        client_tx: ClientTx,
        capture: Box<dyn CaptureStream>,
        playback: Box<dyn PlaybackSink>,
        status: Arc<watch::Sender<VoiceStatus>>,
    ) -> anyhow::Result<Self> {
        let encoder = FrameEncoder::new(capture.sample_rate(), CAPTURE_FRAME_SIZE)?;
        let cursor = PlaybackCursor::new(playback.now());
        Ok(Self {
            bus,
            client_tx,
            capture,
            playback,
            encoder,
            cursor,
            status,
            open: false,
        })
    }

    fn set_state(&self, state: VoiceState) {
        self.status.send_if_modified(|status| {
            let changed = status.state != state;
            if changed {
                tracing::debug!("voice state {:?} -> {:?}", status.state, state);
                status.state = state;
            }
            changed
        });
    }

    // The devices are not Sync, so the returned future must not borrow the session.
    fn send(
        &self,
        message: ClientMessage,
    ) -> impl Future<Output = Result<(), AgentError>> + Send + 'static {
        let client_tx = self.client_tx.clone();
        async move {
            client_tx
                .send(message)
                .await
                .map_err(|_| AgentError::Transport("live session closed".to_string()))
        }
    }

    async fn send_audio(&mut self, samples: &[f32]) -> Result<(), AgentError> {
        for payload in self.encoder.push(samples) {
            self.send(ClientMessage::RealtimeInput(RealtimeInput::audio(payload)))
                .await?;
        }
        Ok(())
    }

    fn play(&mut self, chunk: &str) {
        let samples = decode_f32(chunk);
        if samples.is_empty() {
            return;
        }
        let now = self.playback.now();
        let duration = duration_of(samples.len(), OUTPUT_PCM16_SAMPLE_RATE);
        let start = self.cursor.schedule(now, duration);
        self.playback.play_at(start, &samples);
    }

    async fn handle_message(
        &mut self,
        message: ServerMessage,
        grace: &mut Option<Instant>,
    ) -> Result<(), AgentError> {
        if message.setup_complete.is_some() && !self.open {
            tracing::info!("Live session open, starting capture");
            self.open = true;
            self.capture.resume();
            self.set_state(VoiceState::Listening);
        }

        let chunks = message.audio_chunks();
        if !chunks.is_empty() {
            *grace = None;
            self.set_state(VoiceState::Speaking);
            for chunk in chunks {
                self.play(chunk);
            }
        }

        if message.interrupted() {
            tracing::debug!("model interrupted, dropping queued audio");
            let now = self.playback.now();
            self.playback.clear();
            self.cursor.reset(now);
            *grace = None;
            self.set_state(VoiceState::Listening);
        }

        if message.turn_complete() {
            self.playback.flush();
            *grace = Some(Instant::now() + SPEAKING_GRACE);
        }

        if let Some(tool_call) = &message.tool_call {
            for call in &tool_call.function_calls {
                let response = tools::execute(&self.bus, call);
                self.send(ClientMessage::ToolResponse(ToolResponse::single(response)))
                    .await?;
            }
        }

        if let Some(cancellation) = &message.tool_call_cancellation {
            tracing::info!("tool calls cancelled: {:?}", cancellation.ids);
        }
        if let Some(go_away) = &message.go_away {
            tracing::warn!("server going away, time left: {:?}", go_away.time_left);
        }
        Ok(())
    }

    fn finish(mut self, exit: Exit) {
        self.release();
        let error = match exit {
            Exit::Stopped => {
                tracing::info!("voice session stopped");
                None
            }
            Exit::Closed(reason) => {
                tracing::info!("voice session closed by server: {:?}", reason);
                None
            }
            Exit::Failed(e) => {
                tracing::error!("voice session failed: {}", e);
                Some(e.user_message().to_string())
            }
        };
        self.status.send_modify(|status| {
            status.state = VoiceState::Idle;
            if error.is_some() {
                status.error = error;
            }
        });
    }

    fn release(&mut self) {
        self.capture.stop();
        self.playback.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

async fn next_frame(frames: &mut Option<mpsc::Receiver<Vec<f32>>>) -> Option<Vec<f32>> {
    match frames {
        Some(frames) => frames.recv().await,
        None => std::future::pending().await,
    }
}

pub(super) async fn run(
    mut session: Session,
    mut server_rx: ServerRx,
    mut frames: Option<mpsc::Receiver<Vec<f32>>>,
    connection: Option<Connection>,
    cancel: CancellationToken,
) {
    let mut grace: Option<Instant> = None;
    let mut capturing = true;

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Stopped,
            event = server_rx.recv() => match event {
                Some(LiveEvent::Message(message)) => {
                    if let Err(e) = session.handle_message(message, &mut grace).await {
                        break Exit::Failed(e);
                    }
                }
                Some(LiveEvent::Closed(reason)) => break Exit::Closed(reason),
                Some(LiveEvent::Error(e)) => break Exit::Failed(AgentError::Transport(e)),
                None => break Exit::Closed(None),
            },
            frame = next_frame(&mut frames), if session.open && capturing => match frame {
                Some(samples) => {
                    if let Err(e) = session.send_audio(&samples).await {
                        break Exit::Failed(e);
                    }
                }
                None => {
                    tracing::warn!("capture stream ended");
                    capturing = false;
                }
            },
            _ = tokio::time::sleep_until(grace.unwrap_or_else(Instant::now)), if grace.is_some() => {
                grace = None;
                session.set_state(VoiceState::Listening);
            }
        }
    };

    session.finish(exit);
    // Closes the socket after the devices are released.
    drop(connection);
}
