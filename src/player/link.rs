use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serenity::model::id::GuildId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::player::events::PlayerEvent;
use crate::player::protocol::{
    LoadResult, NodeEvent, NodeMessage, OutgoingOp, PlayerUpdateRequest,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, WsMessage>;

pub const CLIENT_NAME: &str = concat!("nexus-music/", env!("CARGO_PKG_VERSION"));

/// Conexión viva hacia un nodo de audio.
///
/// Mantiene el WebSocket de control y el cliente REST del mismo nodo. Las
/// sesiones envían ops por aquí; el lector traduce los mensajes entrantes a
/// [`PlayerEvent`] y los entrega al despachador.
pub struct NodeLink {
    pub identifier: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    user_id: u64,
    me: Weak<NodeLink>,
    session_id: parking_lot::RwLock<Option<String>>,
    connected: AtomicBool,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    rest: reqwest::Client,
    events_tx: flume::Sender<PlayerEvent>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl NodeLink {
    pub fn new(
        identifier: String,
        host: String,
        port: u16,
        password: String,
        secure: bool,
        user_id: u64,
        events_tx: flume::Sender<PlayerEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            identifier,
            host,
            port,
            password,
            secure,
            user_id,
            me: me.clone(),
            session_id: parking_lot::RwLock::new(None),
            connected: AtomicBool::new(false),
            sink: tokio::sync::Mutex::new(None),
            rest: reqwest::Client::new(),
            events_tx,
            reader: parking_lot::Mutex::new(None),
        })
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }

    fn rest_url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, path)
    }

    /// Abre el WebSocket de control y arranca el lector de eventos.
    ///
    /// La conexión queda utilizable cuando el nodo responde con `ready`;
    /// hasta entonces `is_connected()` devuelve false.
    pub async fn connect(&self) -> Result<()> {
        let mut request = self
            .ws_url()
            .into_client_request()
            .context("URL de nodo inválida")?;

        let headers = request.headers_mut();
        headers.insert("Authorization", HeaderValue::from_str(&self.password)?);
        headers.insert("User-Id", HeaderValue::from_str(&self.user_id.to_string())?);
        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));

        let (stream, _response) = connect_async(request)
            .await
            .with_context(|| format!("No se pudo conectar al nodo {}", self.identifier))?;

        let (sink, read) = stream.split();
        *self.sink.lock().await = Some(sink);

        // El lector mantiene vivo el link solo mientras alguien más lo tenga
        let Some(link) = self.me.upgrade() else {
            return Ok(());
        };
        let handle = tokio::spawn(async move {
            link.read_loop(read).await;
        });
        *self.reader.lock() = Some(handle);

        Ok(())
    }

    /// Cierra la conexión y detiene el lector. Idempotente.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.write() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Envía un op de control por el WebSocket.
    pub async fn send_op(&self, op: &OutgoingOp) -> Result<()> {
        let payload = serde_json::to_string(op)?;

        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .with_context(|| format!("El nodo {} no está conectado", self.identifier))?;

        sink.send(WsMessage::text(payload)).await?;
        Ok(())
    }

    /// PATCH REST del player (pausa, posición, volumen).
    pub async fn update_player(&self, guild_id: GuildId, req: &PlayerUpdateRequest) -> Result<()> {
        let session_id = self
            .session_id()
            .with_context(|| format!("El nodo {} aún no tiene sesión", self.identifier))?;

        let url = self.rest_url(&format!("/v4/sessions/{}/players/{}", session_id, guild_id));

        let response = self
            .rest
            .patch(&url)
            .header("Authorization", &self.password)
            .json(req)
            .send()
            .await
            .with_context(|| format!("PATCH al nodo {} falló", self.identifier))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "El nodo {} rechazó la actualización del player: {}",
                self.identifier,
                response.status()
            );
        }

        Ok(())
    }

    /// Resuelve una URL o término de búsqueda contra el nodo.
    pub async fn load_track(&self, identifier: &str) -> Result<LoadResult> {
        let url = self.rest_url("/v4/loadtracks");

        let response = self
            .rest
            .get(&url)
            .query(&[("identifier", identifier)])
            .header("Authorization", &self.password)
            .send()
            .await
            .with_context(|| format!("loadtracks al nodo {} falló", self.identifier))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "El nodo {} rechazó la búsqueda: {}",
                self.identifier,
                response.status()
            );
        }

        Ok(response.json::<LoadResult>().await?)
    }

    async fn read_loop(self: Arc<Self>, mut read: futures::stream::SplitStream<WsStream>) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(raw)) => match serde_json::from_str::<NodeMessage>(raw.as_str()) {
                    Ok(message) => self.handle_message(message),
                    Err(e) => {
                        warn!("Mensaje no reconocido del nodo {}: {}", self.identifier, e);
                    }
                },
                Ok(WsMessage::Ping(data)) => {
                    let mut guard = self.sink.lock().await;
                    if let Some(sink) = guard.as_mut() {
                        let _ = sink.send(WsMessage::Pong(data)).await;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Error en el socket del nodo {}: {}", self.identifier, e);
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.write() = None;

        info!("🔌 Nodo {} desconectado", self.identifier);
        let _ = self.events_tx.send(PlayerEvent::NodeDisconnected {
            node_id: self.identifier.clone(),
        });
    }

    fn handle_message(&self, message: NodeMessage) {
        match message {
            NodeMessage::Ready { resumed, session_id } => {
                info!(
                    "✅ Nodo {} listo (session {}, resumed={})",
                    self.identifier, session_id, resumed
                );
                *self.session_id.write() = Some(session_id);
                self.connected.store(true, Ordering::SeqCst);
                let _ = self.events_tx.send(PlayerEvent::NodeReady {
                    node_id: self.identifier.clone(),
                    resumed,
                });
            }
            NodeMessage::PlayerUpdate { guild_id, state } => {
                if let Some(guild_id) = parse_guild(&guild_id) {
                    let _ = self
                        .events_tx
                        .send(PlayerEvent::StateUpdate { guild_id, state });
                }
            }
            NodeMessage::Stats(stats) => {
                debug!(
                    "📊 Nodo {}: {} players ({} activos)",
                    self.identifier, stats.players, stats.playing_players
                );
            }
            NodeMessage::Event(event) => self.handle_event(event),
        }
    }

    fn handle_event(&self, event: NodeEvent) {
        let mapped = match event {
            NodeEvent::TrackStart { guild_id, track } => {
                parse_guild(&guild_id).map(|guild_id| PlayerEvent::TrackStart { guild_id, track })
            }
            NodeEvent::TrackEnd {
                guild_id,
                track,
                reason,
            } => parse_guild(&guild_id).map(|guild_id| PlayerEvent::TrackEnd {
                guild_id,
                track,
                reason,
            }),
            NodeEvent::TrackException {
                guild_id,
                track,
                exception,
            } => parse_guild(&guild_id).map(|guild_id| PlayerEvent::TrackException {
                guild_id,
                track,
                message: exception
                    .message
                    .unwrap_or_else(|| exception.severity.clone()),
            }),
            NodeEvent::TrackStuck {
                guild_id,
                threshold_ms,
                ..
            } => parse_guild(&guild_id).map(|guild_id| PlayerEvent::TrackStuck {
                guild_id,
                threshold_ms,
            }),
            NodeEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                ..
            } => parse_guild(&guild_id).map(|guild_id| PlayerEvent::VoiceSocketClosed {
                guild_id,
                code,
                reason,
            }),
            NodeEvent::Unknown => None,
        };

        if let Some(event) = mapped {
            if self.events_tx.send(event).is_err() {
                error!("Despachador de eventos caído; nodo {}", self.identifier);
            }
        }
    }
}

fn parse_guild(raw: &str) -> Option<GuildId> {
    match raw.parse::<u64>() {
        Ok(id) if id != 0 => Some(GuildId::new(id)),
        _ => {
            warn!("guild_id inválido recibido de un nodo: {raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guild_rejects_garbage() {
        assert!(parse_guild("abc").is_none());
        assert!(parse_guild("0").is_none());
        assert_eq!(parse_guild("42"), Some(GuildId::new(42)));
    }

    #[test]
    fn test_ws_url_scheme_follows_secure_flag() {
        let (tx, _rx) = flume::unbounded();
        let link = NodeLink::new(
            "private-1".to_string(),
            "audio.example.com".to_string(),
            443,
            "pw".to_string(),
            true,
            1,
            tx,
        );
        assert_eq!(link.ws_url(), "wss://audio.example.com:443/v4/websocket");
    }
}
