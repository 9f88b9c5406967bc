//! Sesiones de reproducción por guild.
//!
//! Una [`Session`] nace con el primer comando de play, queda atada a un nodo
//! elegido por el [`NodeRegistry`](crate::nodes::NodeRegistry) y muere por
//! stop, desconexión, inactividad o pérdida del nodo. Todos los caminos de
//! teardown pasan por [`PlayerManager::destroy_session`].

pub mod events;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod session;

use anyhow::{Context as _, Result};
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::CoreContext;
use crate::nodes::{NodeRegistry, SessionIndex};
use crate::player::queue::QueueItem;
use crate::player::session::Session;

pub struct PlayerManager {
    sessions: DashMap<GuildId, Arc<Session>>,
    registry: Arc<NodeRegistry>,
    songbird: Arc<Songbird>,
    config: Arc<Config>,
}

impl PlayerManager {
    pub fn new(registry: Arc<NodeRegistry>, songbird: Arc<Songbird>, config: Arc<Config>) -> Self {
        Self {
            sessions: DashMap::new(),
            registry,
            songbird,
            config,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&guild_id).map(|s| Arc::clone(&s))
    }

    /// Devuelve la sesión del guild, creándola y conectándola si no existe.
    pub async fn get_or_create(
        &self,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
        user_id: u64,
    ) -> Result<Arc<Session>> {
        if let Some(session) = self.get(guild_id) {
            session.set_text_channel(text_channel_id);
            return Ok(session);
        }

        let node_id = self
            .registry
            .select_node_for_session(user_id, guild_id)
            .unwrap_or_else(|| "default".to_string());

        let link = self
            .registry
            .get_link(&node_id)
            .or_else(|| self.registry.default_link())
            .context("No hay nodos de audio disponibles")?;

        let session = Arc::new(Session::new(
            guild_id,
            voice_channel_id,
            text_channel_id,
            link,
            self.config.max_queue_size,
        ));

        session.connect(&self.songbird).await?;
        self.sessions.insert(guild_id, Arc::clone(&session));

        info!("🎧 Sesión creada en guild {} (nodo {})", guild_id, session.node_id());
        Ok(session)
    }

    /// Encola un track, creando la sesión si hace falta.
    ///
    /// Este es el punto de entrada que usan los comandos: también garantiza
    /// que el monitor de actividad del guild exista.
    pub async fn play(
        &self,
        ctx: &Arc<CoreContext>,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
        user_id: u64,
        item: QueueItem,
    ) -> Result<Arc<Session>> {
        let session = self
            .get_or_create(guild_id, voice_channel_id, text_channel_id, user_id)
            .await?;

        ctx.monitors.ensure_instance(guild_id, ctx);
        session.enqueue(item).await?;

        Ok(session)
    }

    /// Teardown completo de la sesión de un guild. Idempotente.
    ///
    /// Todos los triggers (stop manual, timeout de actividad, limpieza por
    /// cola vacía o canal vacío, pérdida del bot en el canal) terminan acá:
    /// destruye el player en el nodo, suelta el gateway de voz y elimina las
    /// instancias por guild de presentador y monitor.
    pub async fn destroy_session(&self, ctx: &Arc<CoreContext>, guild_id: GuildId) {
        let session = match self.sessions.remove(&guild_id) {
            Some((_, session)) => session,
            None => return,
        };

        if let Err(e) = session.send_destroy().await {
            warn!("No se pudo destruir el player en el nodo: {e:?}");
        }

        if let Err(e) = self.songbird.remove(guild_id).await {
            warn!("No se pudo soltar el gateway de voz de {}: {e:?}", guild_id);
        }

        ctx.presenters.remove_instance(guild_id);
        ctx.monitors.remove_instance(guild_id);

        let voice_status = Arc::clone(&ctx.voice_status);
        let channel = session.voice_channel_id();
        tokio::spawn(async move {
            voice_status.clear(channel).await;
        });

        info!("🔌 Sesión de guild {} destruida", guild_id);
    }

    /// Detiene y destruye por pedido explícito del usuario.
    pub async fn stop(&self, ctx: &Arc<CoreContext>, guild_id: GuildId) {
        if let Some(session) = self.get(guild_id) {
            if let Err(e) = session.stop().await {
                error!("Error al detener reproducción en {}: {e:?}", guild_id);
            }
        }
        self.destroy_session(ctx, guild_id).await;
    }
}

impl SessionIndex for PlayerManager {
    fn node_for_guild(&self, guild_id: GuildId) -> Option<String> {
        self.get(guild_id).map(|s| s.node_id().to_string())
    }

    fn is_node_in_use(&self, node_id: &str) -> bool {
        self.sessions.iter().any(|entry| entry.node_id() == node_id)
    }
}
