//! Despachador de eventos de los nodos de audio.
//!
//! Una sola tarea consume el canal al que todos los links de nodos empujan
//! sus eventos ya mapeados. Por cada tipo de evento hay exactamente un
//! handler por sesión; acá no hay fan-out.

use serenity::builder::CreateMessage;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cleanup;
use crate::context::CoreContext;
use crate::player::events::PlayerEvent;
use crate::player::protocol::{TrackData, TrackEndReason};
use crate::ui::embeds;

pub async fn run_dispatcher(core: Arc<CoreContext>, rx: flume::Receiver<PlayerEvent>) {
    info!("📡 Despachador de eventos de nodos iniciado");

    while let Ok(event) = rx.recv_async().await {
        handle_event(&core, event).await;
    }

    warn!("El canal de eventos de nodos se cerró");
}

async fn handle_event(core: &Arc<CoreContext>, event: PlayerEvent) {
    match event {
        PlayerEvent::NodeReady { node_id, resumed } => {
            info!("🎼 Nodo {} operativo (resumed={})", node_id, resumed);
        }
        PlayerEvent::NodeDisconnected { node_id } => {
            // El bookkeeping de fallas corre en el chequeo de salud; acá
            // solo se deja constancia. La reconexión de sesiones en vuelo
            // es asunto del propio nodo.
            warn!("🔌 Se perdió la conexión con el nodo {}", node_id);
        }
        PlayerEvent::TrackStart { guild_id, track } => {
            on_track_start(core, guild_id, track).await;
        }
        PlayerEvent::TrackEnd {
            guild_id, reason, ..
        } => {
            on_track_end(core, guild_id, reason).await;
        }
        PlayerEvent::TrackException {
            guild_id,
            track,
            message,
        } => {
            error!("❌ Error de track en guild {}: {}", guild_id, message);
            if let Some(session) = core.manager.get(guild_id) {
                let _ = session
                    .text_channel_id()
                    .send_message(
                        &core.http,
                        CreateMessage::new()
                            .embed(embeds::track_error_embed(&track.info.title, &message)),
                    )
                    .await;
            }
        }
        PlayerEvent::TrackStuck {
            guild_id,
            threshold_ms,
        } => {
            warn!("⚠️ Track trabado en guild {} ({}ms)", guild_id, threshold_ms);
        }
        PlayerEvent::StateUpdate { guild_id, state } => {
            if let Some(session) = core.manager.get(guild_id) {
                session.update_position(&state);
            }
        }
        PlayerEvent::VoiceSocketClosed {
            guild_id,
            code,
            reason,
        } => {
            warn!(
                "🔇 Socket de voz cerrado en guild {} (código {}): {}",
                guild_id, code, reason
            );
            if let Some(session) = core.manager.get(guild_id) {
                session.mark_voice_disconnected();
            }
        }
    }
}

async fn on_track_start(core: &Arc<CoreContext>, guild_id: GuildId, track: TrackData) {
    let Some(session) = core.manager.get(guild_id) else {
        return;
    };

    session.mark_track_started();
    info!("▶️ Reproduciendo {} en guild {}", track.info.title, guild_id);

    if let Some(item) = session.current_track() {
        core.voice_status
            .set_playing(session.voice_channel_id(), &item)
            .await;
    }

    let presenter = core.presenters.get_or_create(guild_id, core);
    presenter.refresh_now(core, &session).await;
}

async fn on_track_end(core: &Arc<CoreContext>, guild_id: GuildId, reason: TrackEndReason) {
    let Some(session) = core.manager.get(guild_id) else {
        return;
    };

    session.mark_track_ended();
    debug!("⏹ Track terminado en guild {} ({:?})", guild_id, reason);

    // Stop explícito o replace: quien lo pidió ya decidió qué sigue
    if !reason.may_start_next() {
        return;
    }

    match session.start_next().await {
        Ok(true) => {
            debug!("Quedan {} tracks en la cola de {}", session.queue_len(), guild_id);
        }
        Ok(false) => {
            // Cola agotada y sin continuación: limpieza diferida
            core.voice_status.clear(session.voice_channel_id()).await;
            cleanup::schedule_idle_cleanup(Arc::clone(core), guild_id);
        }
        Err(e) => {
            error!("No se pudo avanzar la cola en guild {}: {e:?}", guild_id);
        }
    }
}
