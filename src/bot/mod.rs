//! # Bot Module
//!
//! Main Discord-facing layer of the bot, built around [`NexusBot`], which
//! implements Serenity's [`EventHandler`] trait and wires gateway events
//! into the session core.
//!
//! ## Responsibilities
//!
//! - `ready`: builds the shared [`CoreContext`], registers slash commands,
//!   brings up the audio nodes and starts the node-event dispatcher
//! - `interaction_create`: slash commands plus component clicks (player
//!   controls, activity-check confirmation)
//! - `voice_state_update`: bot kicked from voice, channel emptied (delayed
//!   cleanup trigger) and listener rejoin (direct resume)
//!
//! Slash commands live in [`commands`] and go through
//! [`PlayerManager::play`](crate::player::PlayerManager::play) and friends.

pub mod commands;
pub mod events;

use serenity::all::{ComponentInteraction, Context, EventHandler, Interaction, Ready, VoiceState};
use serenity::async_trait;
use serenity::builder::CreateInteractionResponse;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

use crate::activity::ActivityMonitorRegistry;
use crate::cleanup;
use crate::config::Config;
use crate::context::CoreContext;
use crate::nodes::NodeRegistry;
use crate::now_playing::NowPlayingRegistry;
use crate::player::events::PlayerEvent;
use crate::player::PlayerManager;
use crate::storage::JsonStorage;
use crate::ui::buttons::button_ids;
use crate::voice_status::VoiceStatusPublisher;

pub struct NexusBot {
    config: Arc<Config>,
    storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    registry: Arc<NodeRegistry>,
    manager: Arc<PlayerManager>,
    presenters: Arc<NowPlayingRegistry>,
    monitors: Arc<ActivityMonitorRegistry>,
    voice_status: Arc<VoiceStatusPublisher>,
    events_rx: parking_lot::Mutex<Option<flume::Receiver<PlayerEvent>>>,
    core: OnceLock<Arc<CoreContext>>,
}

impl NexusBot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        storage: Arc<tokio::sync::Mutex<JsonStorage>>,
        registry: Arc<NodeRegistry>,
        manager: Arc<PlayerManager>,
        presenters: Arc<NowPlayingRegistry>,
        monitors: Arc<ActivityMonitorRegistry>,
        voice_status: Arc<VoiceStatusPublisher>,
        events_rx: flume::Receiver<PlayerEvent>,
    ) -> Self {
        Self {
            config,
            storage,
            registry,
            manager,
            presenters,
            monitors,
            voice_status,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            core: OnceLock::new(),
        }
    }

    /// Registra los comandos slash, globales o por guild según configuración.
    async fn register_commands(&self, ctx: &Context) {
        let result = match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild de desarrollo {}", guild_id);
                commands::register_guild_commands(ctx, serenity::model::id::GuildId::new(guild_id))
                    .await
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await
            }
        };

        if let Err(e) = result {
            error!("Error al registrar comandos: {e:?}");
        }
    }

    async fn handle_component(&self, ctx: &Context, component: ComponentInteraction) {
        let Some(core) = self.core.get() else {
            return;
        };

        let Some(guild_id) = component.guild_id else {
            return;
        };

        // Responder rápido para que Discord no marque la interacción caída
        if let Err(e) = component
            .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
            .await
        {
            debug!("No se pudo confirmar la interacción: {e}");
        }

        match component.data.custom_id.as_str() {
            button_ids::ACTIVITY_CONFIRM => {
                if let Some(monitor) = core.monitors.get(guild_id) {
                    // Un click tardío contra un monitor ya vencido es no-op
                    monitor.on_continue_confirmed(core).await;
                }
            }
            button_ids::PLAY_PAUSE => {
                if let Some(session) = core.manager.get(guild_id) {
                    let pause = !session.is_paused();
                    if let Err(e) = session.pause(pause).await {
                        error!("No se pudo alternar pausa en {}: {e:?}", guild_id);
                        return;
                    }

                    if let Some(track) = session.current_track() {
                        if pause {
                            core.voice_status
                                .set_paused(session.voice_channel_id(), &track)
                                .await;
                        } else {
                            core.voice_status
                                .set_playing(session.voice_channel_id(), &track)
                                .await;
                        }
                    }
                }
            }
            button_ids::SKIP => {
                if let Some(session) = core.manager.get(guild_id) {
                    match session.start_next().await {
                        Ok(true) => {}
                        Ok(false) => {
                            // Nada más en la cola: parar y programar limpieza
                            if let Err(e) = session.stop().await {
                                error!("No se pudo detener tras el skip en {}: {e:?}", guild_id);
                            }
                            core.voice_status.clear(session.voice_channel_id()).await;
                            cleanup::schedule_idle_cleanup(Arc::clone(core), guild_id);
                        }
                        Err(e) => {
                            error!("Skip falló en {}: {e:?}", guild_id);
                        }
                    }
                }
            }
            button_ids::STOP => {
                core.manager.stop(core, guild_id).await;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl EventHandler for NexusBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.registry.set_bot_user_id(ready.user.id.get());

        let core = Arc::new(CoreContext {
            config: Arc::clone(&self.config),
            http: Arc::clone(&ctx.http),
            cache: Arc::clone(&ctx.cache),
            storage: Arc::clone(&self.storage),
            registry: Arc::clone(&self.registry),
            manager: Arc::clone(&self.manager),
            presenters: Arc::clone(&self.presenters),
            monitors: Arc::clone(&self.monitors),
            voice_status: Arc::clone(&self.voice_status),
            bot_user_id: ready.user.id,
        });

        if self.core.set(Arc::clone(&core)).is_err() {
            // Reconexión del gateway: todo esto ya está andando
            return;
        }

        self.register_commands(&ctx).await;

        self.registry.init_default_node().await;
        self.registry.restore_persisted_nodes().await;

        if let Some(rx) = self.events_rx.lock().take() {
            tokio::spawn(events::run_dispatcher(core, rx));
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                let Some(core) = self.core.get() else {
                    return;
                };
                if let Err(e) = commands::handle_command(&ctx, command, core).await {
                    error!("Error manejando comando: {e:?}");
                }
            }
            Interaction::Component(component) => {
                self.handle_component(&ctx, component).await;
            }
            _ => {}
        }
    }

    /// Cambios de estado de voz: acá viven dos de los triggers de limpieza.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(core) = self.core.get() else {
            return;
        };

        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|o| o.guild_id))
        else {
            return;
        };

        // El bot fue desconectado a mano del canal de voz
        if new.user_id == core.bot_user_id {
            if old.is_some() && new.channel_id.is_none() {
                warn!("🔌 Bot desconectado del canal de voz en guild {}", guild_id);
                core.manager.destroy_session(core, guild_id).await;
            }
            return;
        }

        let Some(session) = core.manager.get(guild_id) else {
            return;
        };

        // Solo interesan movimientos que tocan el canal de la sesión
        let session_channel = session.voice_channel_id();
        let touches_session_channel = new.channel_id == Some(session_channel)
            || old
                .as_ref()
                .map(|o| o.channel_id == Some(session_channel))
                .unwrap_or(false);
        if !touches_session_channel {
            return;
        }

        let members =
            cleanup::non_bot_members_in_channel(&ctx.cache, guild_id, session_channel);

        if members == 0 {
            cleanup::handle_channel_empty(Arc::clone(core), guild_id).await;
        } else if members == 1 && session.is_paused() {
            cleanup::handle_member_rejoined(Arc::clone(core), guild_id).await;
        }
    }
}
