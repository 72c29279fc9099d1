//! The per-client session loop.

use super::{SessionInput, SessionRegistry};
use crate::audio::CodecFactory;
use crate::binary::AudioFrame;
use crate::config::BridgeConfig;
use crate::events::{CloseReason, Event};
use crate::socket::{BackendWriter, FramerOutput, StreamFramer, READ_CHUNK_SIZE};
use crate::transport::{PlayoutSink, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

/// How long queued backend writes may take to flush on shutdown.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One browser client bridged to one backend connection.
///
/// The session task is the only owner of the framer and the audio state:
/// backend reads, capture chunks, peer messages and playout ticks are
/// handled one at a time, so none of it needs a lock.
pub struct BridgeSession {
    registry: SessionRegistry,
    framer: StreamFramer,
    peer: Arc<dyn Transport>,
    sink: Box<dyn PlayoutSink>,
    events: mpsc::UnboundedSender<Event>,
    backend_queue_depth: usize,
}

impl BridgeSession {
    pub fn new(
        connection: Uuid,
        config: &BridgeConfig,
        codecs: Arc<dyn CodecFactory>,
        peer: Arc<dyn Transport>,
        sink: Box<dyn PlayoutSink>,
        events: mpsc::UnboundedSender<Event>,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: SessionRegistry::new(connection, config, codecs)?,
            framer: StreamFramer::new(config.max_frame_len),
            peer,
            sink,
            events,
            backend_queue_depth: config.backend_queue_depth,
        })
    }

    pub fn connection(&self) -> Uuid {
        self.registry.connection()
    }

    /// Runs until the backend goes away, the stream is corrupt, or a stop is
    /// requested. Teardown happens before this returns.
    pub async fn run<B>(mut self, backend: B, mut inputs: mpsc::Receiver<SessionInput>) -> CloseReason
    where
        B: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = self.connection();
        let (mut reader, writer) = tokio::io::split(backend);
        let (writer, mut write_task) = BackendWriter::spawn(writer, self.backend_queue_depth);
        let mut write_done = false;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        tracing::info!(%connection, "session started");
        self.emit(Event::BackendConnected { connection });

        let reason = loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break CloseReason::BackendClosed,
                    Ok(n) => {
                        if let Err(reason) = self.on_backend_data(&buf[..n]).await {
                            break reason;
                        }
                    }
                    Err(e) => break CloseReason::BackendError(e.to_string()),
                },
                input = inputs.recv() => match input {
                    None => break CloseReason::InputsDropped,
                    Some(SessionInput::Stop) => break CloseReason::Stopped,
                    Some(input) => self.on_input(input, &writer),
                },
                session_id = self.registry.next_drain() => self.on_drain(session_id),
                res = &mut write_task, if !write_done => {
                    write_done = true;
                    break match res {
                        Ok(Ok(())) => CloseReason::BackendClosed,
                        Ok(Err(e)) => CloseReason::BackendError(e.to_string()),
                        Err(e) => CloseReason::BackendError(e.to_string()),
                    };
                }
            }
        };

        if reason.is_error() {
            tracing::error!(%connection, %reason, "session failed");
        } else {
            tracing::info!(%connection, %reason, "session ending");
        }

        for session_id in self.registry.teardown() {
            self.sink.remove_track(session_id);
        }

        drop(writer);
        if !write_done {
            let abort = write_task.abort_handle();
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, write_task).await.is_err() {
                tracing::warn!(%connection, "backend writer did not drain in time");
                abort.abort();
            }
        }

        if let Err(e) = self.peer.close().await {
            tracing::debug!(%connection, error = %e, "closing peer channel failed");
        }
        let stats = self.framer.stats();
        tracing::debug!(
            %connection,
            audio_frames = stats.audio_frames,
            dropped_frames = stats.dropped_frames,
            passthrough_bytes = stats.passthrough_bytes,
            sent_frames = self.registry.egress().emitted(),
            "session stats"
        );
        self.emit(Event::Closed {
            connection,
            reason: reason.clone(),
        });
        reason
    }

    async fn on_backend_data(&mut self, chunk: &[u8]) -> Result<(), CloseReason> {
        let outputs = self
            .framer
            .feed(chunk)
            .map_err(|e| CloseReason::Corruption(e.to_string()))?;
        for item in outputs {
            match item {
                FramerOutput::Passthrough(bytes) => {
                    if let Err(e) = self.peer.send(&bytes).await {
                        tracing::warn!(connection = %self.connection(), error = %e, len = bytes.len(), "peer send failed");
                    }
                }
                FramerOutput::Audio(frame) => self.on_audio(&frame),
            }
        }
        Ok(())
    }

    fn on_audio(&mut self, frame: &AudioFrame) {
        let connection = self.connection();
        match self.registry.on_audio_frame(frame) {
            Ok(Some(track_num)) => {
                let session_id = frame.session_id;
                tracing::info!(%connection, session_id, track = track_num, "speaker added");
                if let Err(e) = self.sink.add_track(session_id, track_num) {
                    tracing::warn!(%connection, session_id, error = %e, "adding playout track failed");
                }
                self.emit(Event::SpeakerAdded {
                    connection,
                    session_id,
                    track_num,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%connection, session_id = frame.session_id, error = %e, "audio frame dropped");
            }
        }
    }

    fn on_input(&mut self, input: SessionInput, writer: &BackendWriter) {
        let connection = self.connection();
        match input {
            SessionInput::Capture(samples) => match self.registry.on_capture(&samples) {
                Ok(Some(frame)) => {
                    if let Err(e) = writer.send(frame) {
                        tracing::warn!(%connection, error = %e, "dropping voice frame");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%connection, error = %e, "capture chunk dropped"),
            },
            SessionInput::PeerData(data) => {
                if let Err(e) = writer.send(data) {
                    tracing::warn!(%connection, error = %e, "dropping peer data");
                }
            }
            SessionInput::SpeakerLeft(session_id) => {
                if self.registry.speaker_left(session_id) {
                    tracing::info!(%connection, session_id, "speaker left");
                    self.sink.remove_track(session_id);
                    self.emit(Event::SpeakerRemoved {
                        connection,
                        session_id,
                    });
                }
            }
            SessionInput::Stop => {}
        }
    }

    fn on_drain(&mut self, session_id: u32) {
        // Underrun: nothing is pushed this tick.
        if let Some(samples) = self.registry.drain(session_id) {
            if let Err(e) = self.sink.play(session_id, samples) {
                tracing::warn!(session_id, error = %e, "playout failed");
            }
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}
