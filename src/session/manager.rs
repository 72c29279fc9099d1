//! Session bookkeeping: spawning, lookup and shutdown.

use super::{BridgeSession, SessionInput};
use crate::audio::CodecFactory;
use crate::config::BridgeConfig;
use crate::error::SessionError;
use crate::events::Event;
use crate::transport::{PlayoutSink, Transport};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Cloneable handle for feeding a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::Sender<SessionInput>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues one chunk of captured PCM without waiting. Fails with
    /// `QueueFull` instead of blocking the capture callback.
    pub fn push_capture(&self, samples: Vec<i16>) -> crate::Result<()> {
        self.tx
            .try_send(SessionInput::Capture(samples))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
            })?;
        Ok(())
    }

    /// Forwards bytes from the peer data channel to the backend.
    pub async fn forward_to_backend(&self, data: Bytes) -> crate::Result<()> {
        self.send(SessionInput::PeerData(data)).await
    }

    pub async fn speaker_left(&self, session_id: u32) -> crate::Result<()> {
        self.send(SessionInput::SpeakerLeft(session_id)).await
    }

    pub async fn stop(&self) -> crate::Result<()> {
        self.send(SessionInput::Stop).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, input: SessionInput) -> crate::Result<()> {
        self.tx.send(input).await.map_err(|_| SessionError::Closed)?;
        Ok(())
    }
}

/// Owns the shared configuration and codec factory, and tracks every open
/// session.
pub struct SessionManager {
    config: BridgeConfig,
    codecs: Arc<dyn CodecFactory>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl SessionManager {
    pub fn new(config: BridgeConfig, codecs: Arc<dyn CodecFactory>) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            codecs,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Manager backed by the Opus codec.
    #[cfg(feature = "opus")]
    pub fn with_opus(config: BridgeConfig) -> crate::Result<Self> {
        let codecs = crate::audio::OpusCodecFactory::new(&config)?;
        Self::new(config, Arc::new(codecs))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connects to the configured backend and starts a session on it.
    pub async fn connect(
        &self,
        peer: Arc<dyn Transport>,
        sink: Box<dyn PlayoutSink>,
        events: mpsc::UnboundedSender<Event>,
    ) -> crate::Result<SessionHandle> {
        let stream = crate::socket::connect(self.config.backend_addr.as_str()).await?;
        self.start(stream, peer, sink, events).await
    }

    /// Starts a session over an already-open backend stream.
    pub async fn start<B>(
        &self,
        backend: B,
        peer: Arc<dyn Transport>,
        sink: Box<dyn PlayoutSink>,
        events: mpsc::UnboundedSender<Event>,
    ) -> crate::Result<SessionHandle>
    where
        B: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = Uuid::new_v4();
        let session = BridgeSession::new(
            id,
            &self.config,
            Arc::clone(&self.codecs),
            peer,
            sink,
            events,
        )?;
        let (tx, rx) = mpsc::channel(self.config.input_queue_depth);
        let handle = SessionHandle { id, tx };

        // Registered before spawning so a session that ends immediately
        // still finds its own entry to remove.
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, handle.clone());
            tracing::info!(connection = %id, open = sessions.len(), "session opened");
        }

        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let reason = session.run(backend, rx).await;
            let mut sessions = sessions.write().await;
            sessions.remove(&id);
            tracing::info!(connection = %id, %reason, open = sessions.len(), "session closed");
        });
        Ok(handle)
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn stop(&self, id: Uuid) -> crate::Result<()> {
        let handle = self.get(id).await.ok_or(SessionError::Unknown(id))?;
        handle.stop().await
    }

    /// Asks every open session to stop. Sessions that already ended are
    /// skipped.
    pub async fn stop_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            if let Err(e) = handle.stop().await {
                tracing::debug!(connection = %handle.id(), error = %e, "stop skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeCodecs;
    use crate::events::CloseReason;
    use std::time::Duration;

    struct NullPeer;

    #[async_trait::async_trait]
    impl Transport for NullPeer {
        async fn send(&self, _data: &[u8]) -> crate::Result<()> {
            Ok(())
        }

        async fn close(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    struct NullSink;

    impl PlayoutSink for NullSink {
        fn add_track(&mut self, _session_id: u32, _track_num: u32) -> crate::Result<()> {
            Ok(())
        }

        fn play(&mut self, _session_id: u32, _samples: &[i16]) -> crate::Result<()> {
            Ok(())
        }

        fn remove_track(&mut self, _session_id: u32) {}
    }

    fn manager(config: BridgeConfig) -> SessionManager {
        SessionManager::new(config, Arc::new(FakeCodecs)).unwrap()
    }

    async fn closed(events: &mut mpsc::UnboundedReceiver<Event>) -> CloseReason {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(Event::Closed { reason, .. })) => return reason,
                Ok(Some(_)) => continue,
                other => panic!("no close event: {other:?}"),
            }
        }
    }

    async fn wait_until_empty(manager: &SessionManager) {
        for _ in 0..200 {
            if manager.open_sessions().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sessions still open");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BridgeConfig {
            playout_frame_samples: 0,
            ..Default::default()
        };
        let err = SessionManager::new(config, Arc::new(FakeCodecs)).err().unwrap();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[tokio::test]
    async fn start_tracks_and_stop_releases_session() {
        let manager = manager(BridgeConfig::default());
        let (client, _server) = tokio::io::duplex(256);
        let (tx, mut events) = mpsc::unbounded_channel();

        let handle = manager
            .start(client, Arc::new(NullPeer), Box::new(NullSink), tx)
            .await
            .unwrap();
        assert_eq!(manager.open_sessions().await, 1);
        assert_eq!(manager.get(handle.id()).await.unwrap().id(), handle.id());

        manager.stop(handle.id()).await.unwrap();
        assert_eq!(closed(&mut events).await, CloseReason::Stopped);
        wait_until_empty(&manager).await;
        assert!(manager.get(handle.id()).await.is_none());

        let err = manager.stop(handle.id()).await.unwrap_err();
        assert!(matches!(err, crate::Error::Session(SessionError::Unknown(_))));
    }

    #[tokio::test]
    async fn backend_hangup_removes_session() {
        let manager = manager(BridgeConfig::default());
        let (client, server) = tokio::io::duplex(256);
        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = manager
            .start(client, Arc::new(NullPeer), Box::new(NullSink), tx)
            .await
            .unwrap();

        drop(server);
        assert_eq!(closed(&mut events).await, CloseReason::BackendClosed);
        wait_until_empty(&manager).await;

        let err = handle.push_capture(vec![0; 480]).unwrap_err();
        assert!(matches!(err, crate::Error::Session(SessionError::Closed)));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn full_queue_rejects_capture() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            tx,
        };
        handle.push_capture(vec![0; 480]).unwrap();
        let err = handle.push_capture(vec![0; 480]).unwrap_err();
        assert!(matches!(err, crate::Error::Session(SessionError::QueueFull)));
    }

    #[tokio::test]
    async fn stop_all_ends_every_session() {
        let manager = manager(BridgeConfig::default());
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut servers = Vec::new();
        for _ in 0..3 {
            let (client, server) = tokio::io::duplex(256);
            servers.push(server);
            manager
                .start(client, Arc::new(NullPeer), Box::new(NullSink), tx.clone())
                .await
                .unwrap();
        }
        assert_eq!(manager.open_sessions().await, 3);

        manager.stop_all().await;
        for _ in 0..3 {
            assert_eq!(closed(&mut events).await, CloseReason::Stopped);
        }
        wait_until_empty(&manager).await;
    }

    #[tokio::test]
    async fn peer_data_reaches_backend() {
        use tokio::io::AsyncReadExt;

        let manager = manager(BridgeConfig::default());
        let (client, mut server) = tokio::io::duplex(256);
        let (tx, _events) = mpsc::unbounded_channel();
        let handle = manager
            .start(client, Arc::new(NullPeer), Box::new(NullSink), tx)
            .await
            .unwrap();

        handle
            .forward_to_backend(Bytes::from_static(&[0, 3, 0, 0, 0, 0]))
            .await
            .unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 3, 0, 0, 0, 0]);
        handle.stop().await.unwrap();
    }
}
