//! Limpieza diferida de sesiones.
//!
//! Dos triggers independientes (cola agotada y canal de voz vacío) usan el
//! mismo patrón: escribir un token fresco en la sesión, esperar, y actuar
//! solo si el token capturado sigue vigente y el estado observado lo
//! justifica. Ningún timer se cancela de verdad: un trigger más nuevo
//! simplemente pisa el token y el callback viejo despierta, compara y se va
//! sin hacer nada ni loguearlo como falla.

use serenity::builder::CreateMessage;
use serenity::cache::Cache;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::CoreContext;
use crate::ui::embeds;

/// Decide si un callback de limpieza por cola agotada debe destruir.
///
/// Requiere que el token siga vigente y que la sesión siga ociosa: sin
/// reproducción activa y sin track actual.
pub fn idle_cleanup_due(
    current_token: u64,
    captured_token: u64,
    is_playing: bool,
    has_current_track: bool,
) -> bool {
    current_token == captured_token && !is_playing && !has_current_track
}

/// Decide si un callback de limpieza por canal vacío debe destruir.
pub fn empty_channel_cleanup_due(
    current_token: u64,
    captured_token: u64,
    non_bot_members: usize,
) -> bool {
    current_token == captured_token && non_bot_members == 0
}

/// Miembros humanos presentes en un canal de voz, según el cache.
pub fn non_bot_members_in_channel(
    cache: &Cache,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> usize {
    let Some(guild) = cache.guild(guild_id) else {
        return 0;
    };

    guild
        .voice_states
        .values()
        .filter(|vs| vs.channel_id == Some(channel_id))
        .filter(|vs| {
            guild
                .members
                .get(&vs.user_id)
                .map(|m| !m.user.bot)
                .unwrap_or(true)
        })
        .count()
}

/// La cola se agotó sin continuación: programa la destrucción diferida.
pub fn schedule_idle_cleanup(ctx: Arc<CoreContext>, guild_id: GuildId) {
    let Some(session) = ctx.manager.get(guild_id) else {
        return;
    };

    let captured = session.bump_cleanup_token();
    let delay = ctx.config.cleanup_delay();
    info!("⏳ Limpieza por cola vacía programada en guild {}", guild_id);

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        // Releer la sesión viva: puede haber muerto por otro camino
        let Some(session) = ctx.manager.get(guild_id) else {
            return;
        };

        if !idle_cleanup_due(
            session.cleanup_token(),
            captured,
            session.is_playing(),
            session.current_track().is_some(),
        ) {
            debug!("Limpieza por cola vacía superada en guild {}", guild_id);
            return;
        }

        ctx.manager.destroy_session(&ctx, guild_id).await;
        info!("🧹 Sesión de guild {} destruida por inactividad de cola", guild_id);
    });
}

/// El canal de voz se quedó sin humanos: pausa ya y programa la destrucción.
pub async fn handle_channel_empty(ctx: Arc<CoreContext>, guild_id: GuildId) {
    let Some(session) = ctx.manager.get(guild_id) else {
        return;
    };

    // Modo 24/7: el bot se queda pase lo que pase
    let always_on = {
        let mut storage = ctx.storage.lock().await;
        storage
            .get_guild_settings(guild_id.get())
            .await
            .map(|s| s.always_on)
            .unwrap_or(false)
    };
    if always_on {
        return;
    }

    if session.is_playing() && !session.is_paused() {
        if let Err(e) = session.pause(true).await {
            warn!("No se pudo pausar al vaciarse el canal de {}: {e:?}", guild_id);
        }
    }

    if let Some(track) = session.current_track() {
        ctx.voice_status
            .set_paused(session.voice_channel_id(), &track)
            .await;
    }

    let text_channel = session.text_channel_id();
    let _ = text_channel
        .send_message(
            &ctx.http,
            CreateMessage::new().embed(embeds::paused_empty_channel_embed()),
        )
        .await;

    let captured = session.bump_cleanup_token();
    let delay = ctx.config.cleanup_delay();
    info!("⏳ Limpieza por canal vacío programada en guild {}", guild_id);

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let Some(session) = ctx.manager.get(guild_id) else {
            return;
        };

        let members =
            non_bot_members_in_channel(&ctx.cache, guild_id, session.voice_channel_id());

        if !empty_channel_cleanup_due(session.cleanup_token(), captured, members) {
            debug!("Limpieza por canal vacío superada en guild {}", guild_id);
            return;
        }

        // Apagar los controles del panel antes de despedirse
        if let Some(presenter) = ctx.presenters.get(guild_id) {
            presenter.disable_controls(&ctx).await;
        }

        let _ = session
            .text_channel_id()
            .send_message(
                &ctx.http,
                CreateMessage::new().embed(embeds::empty_channel_disconnect_embed()),
            )
            .await;

        ctx.manager.destroy_session(&ctx, guild_id).await;
        info!("🧹 Sesión de guild {} destruida por canal vacío", guild_id);
    });
}

/// Alguien volvió al canal mientras la sesión estaba pausada: reanudar ya.
///
/// Transición directa, sin revalidar el token: si había una limpieza
/// pendiente, su propio re-chequeo de miembros la convertirá en no-op.
pub async fn handle_member_rejoined(ctx: Arc<CoreContext>, guild_id: GuildId) {
    let Some(session) = ctx.manager.get(guild_id) else {
        return;
    };

    if !session.is_paused() {
        return;
    }

    if let Err(e) = session.pause(false).await {
        warn!("No se pudo reanudar en guild {}: {e:?}", guild_id);
        return;
    }

    if let Some(track) = session.current_track() {
        ctx.voice_status
            .set_playing(session.voice_channel_id(), &track)
            .await;
    }

    info!("▶️ Reproducción reanudada en guild {}: alguien volvió al canal", guild_id);

    // Aviso transitorio: se borra solo a los pocos segundos
    let http = Arc::clone(&ctx.http);
    let text_channel = session.text_channel_id();
    tokio::spawn(async move {
        if let Ok(message) = text_channel
            .send_message(&http, CreateMessage::new().embed(embeds::resumed_embed()))
            .await
        {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            let _ = message.delete(&http).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn bump(cell: &AtomicU64) -> u64 {
        cell.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[test]
    fn test_idle_cleanup_requires_fresh_token_and_idle_state() {
        assert!(idle_cleanup_due(1, 1, false, false));
        // Token pisado por un trigger más nuevo
        assert!(!idle_cleanup_due(2, 1, false, false));
        // Token vigente pero la sesión volvió a reproducir
        assert!(!idle_cleanup_due(1, 1, true, false));
        assert!(!idle_cleanup_due(1, 1, false, true));
    }

    #[test]
    fn test_empty_channel_cleanup_requires_empty_channel() {
        assert!(empty_channel_cleanup_due(3, 3, 0));
        assert!(!empty_channel_cleanup_due(4, 3, 0));
        assert!(!empty_channel_cleanup_due(3, 3, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_token_destroys() {
        // Reproduce el patrón completo con reloj virtual: dos limpiezas
        // programadas sobre la misma sesión, la segunda pisa a la primera.
        let token_cell = Arc::new(AtomicU64::new(0));
        let destroys = Arc::new(AtomicUsize::new(0));
        let delay = std::time::Duration::from_secs(300);

        let t1 = bump(&token_cell);
        let cell_a = Arc::clone(&token_cell);
        let destroys_a = Arc::clone(&destroys);
        let first = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if idle_cleanup_due(cell_a.load(Ordering::SeqCst), t1, false, false) {
                destroys_a.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Antes de que venza el primero llega un trigger nuevo
        let t2 = bump(&token_cell);
        let cell_b = Arc::clone(&token_cell);
        let destroys_b = Arc::clone(&destroys);
        let second = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if idle_cleanup_due(cell_b.load(Ordering::SeqCst), t2, false, false) {
                destroys_b.fetch_add(1, Ordering::SeqCst);
            }
        });

        first.await.unwrap();
        second.await.unwrap();

        // Solo el token cronológicamente último destruye
        assert_eq!(destroys.load(Ordering::SeqCst), 1);
    }
}
