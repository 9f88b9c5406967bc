use anyhow::Result;
use serde_json::json;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::player::link::NodeLink;
use crate::player::protocol::{OutgoingOp, PlayerState, PlayerUpdateRequest};
use crate::player::queue::{LoopMode, QueueItem, TrackQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Última posición reportada por el nodo y cuándo se recibió.
#[derive(Debug, Clone, Copy)]
pub struct PositionSnapshot {
    pub position_ms: u64,
    pub received_at: Instant,
}

/// Sesión de reproducción de un guild.
///
/// Vive en el `PlayerManager` desde el primer comando de play hasta que
/// cualquier camino de teardown la destruye. Está atada a exactamente un
/// nodo (`link`) durante toda su vida: nunca se migra en caliente.
pub struct Session {
    pub guild_id: GuildId,
    voice_channel_id: parking_lot::RwLock<ChannelId>,
    text_channel_id: parking_lot::RwLock<ChannelId>,
    state: parking_lot::RwLock<ConnectionState>,
    playing: AtomicBool,
    paused: AtomicBool,
    queue: parking_lot::Mutex<TrackQueue>,
    link: Arc<NodeLink>,
    /// Token de limpieza diferida. Cada trigger nuevo lo avanza; un callback
    /// programado solo actúa si el valor que capturó sigue vigente.
    cleanup_token: AtomicU64,
    position: parking_lot::Mutex<Option<PositionSnapshot>>,
}

impl Session {
    pub fn new(
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
        link: Arc<NodeLink>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            guild_id,
            voice_channel_id: parking_lot::RwLock::new(voice_channel_id),
            text_channel_id: parking_lot::RwLock::new(text_channel_id),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            queue: parking_lot::Mutex::new(TrackQueue::new(max_queue_size)),
            link,
            cleanup_token: AtomicU64::new(0),
            position: parking_lot::Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.link.identifier
    }

    pub fn link(&self) -> &Arc<NodeLink> {
        &self.link
    }

    pub fn voice_channel_id(&self) -> ChannelId {
        *self.voice_channel_id.read()
    }

    pub fn text_channel_id(&self) -> ChannelId {
        *self.text_channel_id.read()
    }

    pub fn set_text_channel(&self, channel: ChannelId) {
        *self.text_channel_id.write() = channel;
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Une el gateway de voz de Discord y reenvía las credenciales al nodo.
    pub async fn connect(&self, songbird: &Arc<Songbird>) -> Result<()> {
        *self.state.write() = ConnectionState::Connecting;

        let channel = self.voice_channel_id();
        let (info, _call) = songbird.join_gateway(self.guild_id, channel).await?;

        self.link
            .send_op(&OutgoingOp::VoiceUpdate {
                guild_id: self.guild_id.to_string(),
                session_id: info.session_id.clone(),
                channel_id: Some(channel.to_string()),
                event: json!({
                    "token": info.token,
                    "endpoint": info.endpoint,
                }),
            })
            .await?;

        *self.state.write() = ConnectionState::Connected;
        info!("🔗 Sesión conectada en guild {} via {}", self.guild_id, self.node_id());

        Ok(())
    }

    /// Encola un track y arranca la reproducción si no hay nada sonando.
    pub async fn enqueue(&self, item: QueueItem) -> Result<bool> {
        self.queue.lock().add_track(item)?;

        // Cualquier comando nuevo invalida una limpieza pendiente
        self.bump_cleanup_token();

        if !self.is_playing() {
            return self.start_next().await;
        }

        Ok(false)
    }

    /// Envía al nodo el siguiente track de la cola.
    ///
    /// Devuelve false si la cola quedó vacía.
    pub async fn start_next(&self) -> Result<bool> {
        let next = self.queue.lock().next_track();

        match next {
            Some(item) => {
                debug!("▶️ Enviando al nodo {}: {}", self.node_id(), item.title);
                self.link
                    .send_op(&OutgoingOp::Play {
                        guild_id: self.guild_id.to_string(),
                        track: item.identifier.clone(),
                    })
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pausa o reanuda via REST del nodo.
    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.link
            .update_player(
                self.guild_id,
                &PlayerUpdateRequest {
                    paused: Some(paused),
                    ..PlayerUpdateRequest::default()
                },
            )
            .await?;

        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    /// Detiene el track actual sin tocar la cola.
    pub async fn stop(&self) -> Result<()> {
        self.link
            .send_op(&OutgoingOp::Stop {
                guild_id: self.guild_id.to_string(),
            })
            .await?;

        self.playing.store(false, Ordering::SeqCst);
        self.queue.lock().finish_current();
        Ok(())
    }

    /// Op de destrucción del player en el nodo. El teardown completo vive en
    /// el `PlayerManager`.
    pub async fn send_destroy(&self) -> Result<()> {
        self.link
            .send_op(&OutgoingOp::Destroy {
                guild_id: self.guild_id.to_string(),
            })
            .await
    }

    pub fn current_track(&self) -> Option<QueueItem> {
        self.queue.lock().current().cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.queue.lock().set_loop_mode(mode);
    }

    pub fn toggle_shuffle(&self) -> bool {
        self.queue.lock().toggle_shuffle()
    }

    // --- Flags actualizados por el despachador de eventos ---

    pub fn mark_track_started(&self) {
        self.playing.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn mark_track_ended(&self) {
        self.playing.store(false, Ordering::SeqCst);
        *self.position.lock() = None;
    }

    pub fn mark_voice_disconnected(&self) {
        *self.state.write() = ConnectionState::Disconnected;
    }

    pub fn update_position(&self, state: &PlayerState) {
        *self.position.lock() = Some(PositionSnapshot {
            position_ms: state.position,
            received_at: Instant::now(),
        });
    }

    pub fn position_snapshot(&self) -> Option<PositionSnapshot> {
        *self.position.lock()
    }

    // --- Token de limpieza diferida ---

    pub fn bump_cleanup_token(&self) -> u64 {
        self.cleanup_token.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn cleanup_token(&self) -> u64 {
        self.cleanup_token.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        let (tx, _rx) = flume::unbounded();
        let link = NodeLink::new(
            "private-1".to_string(),
            "localhost".to_string(),
            2333,
            "pw".to_string(),
            false,
            1,
            tx,
        );
        Session::new(GuildId::new(1), ChannelId::new(2), ChannelId::new(3), link, 100)
    }

    #[test]
    fn test_cleanup_token_is_monotonic() {
        let session = test_session();
        let t1 = session.bump_cleanup_token();
        let t2 = session.bump_cleanup_token();
        assert!(t2 > t1);
        assert_eq!(session.cleanup_token(), t2);
    }

    #[test]
    fn test_flags_follow_track_lifecycle() {
        let session = test_session();
        assert!(!session.is_playing());

        session.mark_track_started();
        assert!(session.is_playing());
        assert!(!session.is_paused());

        session.mark_track_ended();
        assert!(!session.is_playing());
    }
}
