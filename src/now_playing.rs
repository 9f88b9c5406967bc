//! Panel de "reproduciendo ahora".
//!
//! Un solo mensaje por guild que se va editando mientras suena la música,
//! sin pasarse de la tolerancia de edición del API. La exclusión mutua es un
//! booleano (`is_updating`) y no un mutex: alcanza porque todo corre en el
//! mismo event loop y los guards solo se cruzan entre awaits.

use dashmap::DashMap;
use serenity::builder::{CreateMessage, EditMessage, GetMessages};
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::context::CoreContext;
use crate::error::{classify_edit_error, EditFailure};
use crate::player::session::{ConnectionState, Session};
use crate::ui::{buttons, embeds};

/// Posición "virtual" que se muestra en el panel.
///
/// Transformación pura de lectura: jamás toca el estado real del player.
/// Fuera de la ventana final la posición cruda se adelanta un incremento
/// fijo para suavizar los huecos entre polls. En los últimos 10 segundos la
/// posición mostrada acelera hacia el final con un factor
/// `1 + (10000 - restante) / 10000`, sin pasar nunca de `duración - 100ms`,
/// y con menos de 2 segundos restantes salta directo ahí. Sin esto la barra
/// parece congelarse cerca del final por la granularidad del poll.
pub fn virtual_position(raw_position_ms: u64, duration_ms: u64) -> u64 {
    const SMOOTH_STEP_MS: u64 = 300;
    const END_WINDOW_MS: u64 = 10_000;
    const SNAP_WINDOW_MS: u64 = 2_000;
    const END_MARGIN_MS: u64 = 100;

    if duration_ms == 0 {
        // Stream en vivo: no hay final al que acercarse
        return raw_position_ms;
    }

    let end = duration_ms.saturating_sub(END_MARGIN_MS);
    let remaining = duration_ms.saturating_sub(raw_position_ms);

    if remaining < SNAP_WINDOW_MS {
        return end;
    }

    let advanced = if remaining <= END_WINDOW_MS {
        let scale = 1.0 + (END_WINDOW_MS - remaining) as f64 / END_WINDOW_MS as f64;
        raw_position_ms + (SMOOTH_STEP_MS as f64 * scale) as u64
    } else {
        raw_position_ms + SMOOTH_STEP_MS
    };

    advanced.min(end)
}

#[derive(Debug, Clone, Copy)]
struct MessageRef {
    channel_id: ChannelId,
    message_id: MessageId,
}

/// Registro por guild de presentadores, con destrucción explícita.
///
/// Mismo esquema que el registro de monitores de actividad: mapa keyed por
/// guild y `remove_instance` obligatorio en todo camino de teardown. Nada
/// se recicla por su cuenta: una instancia olvidada es un timer filtrado.
pub struct NowPlayingRegistry {
    map: DashMap<GuildId, Arc<NowPlayingPresenter>>,
    config: Arc<Config>,
}

impl NowPlayingRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            map: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<NowPlayingPresenter>> {
        self.map.get(&guild_id).map(|p| Arc::clone(&p))
    }

    pub fn get_or_create(
        &self,
        guild_id: GuildId,
        ctx: &Arc<CoreContext>,
    ) -> Arc<NowPlayingPresenter> {
        if let Some(presenter) = self.get(guild_id) {
            return presenter;
        }

        let presenter = NowPlayingPresenter::new(guild_id, Arc::clone(&self.config));
        presenter.start(ctx);
        self.map.insert(guild_id, Arc::clone(&presenter));
        presenter
    }

    pub fn remove_instance(&self, guild_id: GuildId) {
        if let Some((_, presenter)) = self.map.remove(&guild_id) {
            presenter.destroy();
        }
    }
}

pub struct NowPlayingPresenter {
    guild_id: GuildId,
    config: Arc<Config>,
    me: Weak<NowPlayingPresenter>,
    message: parking_lot::Mutex<Option<MessageRef>>,
    /// Instante del último edit exitoso. El backoff por rate limit lo empuja
    /// hacia el futuro para frenar los próximos ticks.
    last_update: parking_lot::Mutex<Option<Instant>>,
    is_updating: AtomicBool,
    tick_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl NowPlayingPresenter {
    fn new(guild_id: GuildId, config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            guild_id,
            config,
            me: me.clone(),
            message: parking_lot::Mutex::new(None),
            last_update: parking_lot::Mutex::new(None),
            is_updating: AtomicBool::new(false),
            tick_task: parking_lot::Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Arranca el tick regular del panel.
    fn start(&self, ctx: &Arc<CoreContext>) {
        let Some(presenter) = self.me.upgrade() else {
            return;
        };
        let ctx = Arc::clone(ctx);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(presenter.config.now_playing_interval());
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if presenter.destroyed.load(Ordering::SeqCst) {
                    break;
                }

                let Some(session) = ctx.manager.get(presenter.guild_id) else {
                    continue;
                };

                // Solo se actualiza con la sesión conectada, sonando y sin pausa
                if session.connection_state() != ConnectionState::Connected {
                    continue;
                }
                if !session.is_playing() || session.is_paused() {
                    continue;
                }

                presenter.tick(&ctx, &session).await;
            }
        });

        *self.tick_task.lock() = Some(handle);
    }

    /// Un tick del panel, con todos sus guards.
    async fn tick(&self, ctx: &Arc<CoreContext>, session: &Arc<Session>) {
        let now = Instant::now();

        if !self.can_update(now) {
            return;
        }

        let Some(track) = session.current_track() else {
            return;
        };

        // Exclusión mutua: nunca dos edits en vuelo para el mismo mensaje
        if !self.begin_edit() {
            return;
        }

        let duration_ms = track.duration_ms();
        let raw_position = session
            .position_snapshot()
            .map(|s| s.position_ms)
            .unwrap_or(0);
        let shown_position = virtual_position(raw_position, duration_ms);

        let embed = embeds::now_playing_embed(&track, shown_position, duration_ms, session.is_paused());
        let components = buttons::player_controls(session.is_paused(), false);

        self.update_or_create(ctx, session.text_channel_id(), embed, components)
            .await;

        self.finish_edit();
    }

    /// Actualización inmediata, saltando el gap mínimo (arranque de track).
    pub async fn refresh_now(&self, ctx: &Arc<CoreContext>, session: &Arc<Session>) {
        *self.last_update.lock() = None;
        self.tick(ctx, session).await;
    }

    /// Adopta un mensaje existente como panel del guild.
    ///
    /// Rechaza (solo loguea) mensajes que no haya escrito el propio bot:
    /// conectar un mensaje ajeno al actualizador es un error de cableado.
    pub fn set_message(&self, message: &Message, bot_user_id: UserId, force_update: bool) -> bool {
        self.adopt_message(
            message.channel_id,
            message.id,
            message.author.id,
            bot_user_id,
            force_update,
        )
    }

    fn adopt_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        author_id: UserId,
        bot_user_id: UserId,
        force_update: bool,
    ) -> bool {
        if author_id != bot_user_id {
            warn!(
                "Se intentó fijar como panel un mensaje ajeno ({}) en guild {}",
                author_id, self.guild_id
            );
            return false;
        }

        *self.message.lock() = Some(MessageRef {
            channel_id,
            message_id,
        });

        if force_update {
            *self.last_update.lock() = None;
        }

        true
    }

    /// Edita el panel dejando los controles apagados (teardown inminente).
    pub async fn disable_controls(&self, ctx: &Arc<CoreContext>) {
        let reference = *self.message.lock();
        let Some(reference) = reference else { return };

        let result = reference
            .channel_id
            .edit_message(
                &ctx.http,
                reference.message_id,
                EditMessage::new().components(buttons::player_controls(false, true)),
            )
            .await;

        if let Err(e) = result {
            debug!("No se pudieron apagar los controles en {}: {e}", self.guild_id);
        }
    }

    /// Destruye el presentador: corta el tick y suelta el mensaje. Idempotente.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.tick_task.lock().take() {
            handle.abort();
        }

        *self.message.lock() = None;
    }

    // --- Guards ---

    fn can_update(&self, now: Instant) -> bool {
        let min_gap = Duration::from_millis(self.config.now_playing_min_gap_ms);
        match *self.last_update.lock() {
            None => true,
            Some(last) => now >= last + min_gap,
        }
    }

    fn begin_edit(&self) -> bool {
        self.is_updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish_edit(&self) {
        self.is_updating.store(false, Ordering::SeqCst);
    }

    // --- Edición / creación del mensaje ---

    async fn update_or_create(
        &self,
        ctx: &Arc<CoreContext>,
        channel_id: ChannelId,
        embed: serenity::builder::CreateEmbed,
        components: Vec<serenity::builder::CreateActionRow>,
    ) {
        let reference = *self.message.lock();

        match reference {
            Some(reference) => {
                let result = reference
                    .channel_id
                    .edit_message(
                        &ctx.http,
                        reference.message_id,
                        EditMessage::new().embed(embed).components(components),
                    )
                    .await;

                match result {
                    Ok(_) => {
                        *self.last_update.lock() = Some(Instant::now());
                    }
                    Err(e) => self.handle_edit_failure(e),
                }
            }
            None => {
                // Evitar paneles duplicados: borrar restos recientes nuestros
                self.delete_stale_panels(ctx, channel_id).await;

                let result = channel_id
                    .send_message(
                        &ctx.http,
                        CreateMessage::new().embed(embed).components(components),
                    )
                    .await;

                match result {
                    Ok(message) => {
                        self.set_message(&message, ctx.bot_user_id, false);
                        *self.last_update.lock() = Some(Instant::now());
                    }
                    Err(e) => {
                        warn!("No se pudo crear el panel en guild {}: {e}", self.guild_id);
                    }
                }
            }
        }
    }

    fn handle_edit_failure(&self, error: serenity::Error) {
        match classify_edit_error(&error) {
            EditFailure::Gone => {
                // Referencia muerta: el siguiente tick crea un mensaje nuevo
                debug!("Panel de guild {} perdido, se recreará: {error}", self.guild_id);
                *self.message.lock() = None;
            }
            EditFailure::RateLimited => {
                let backoff = Duration::from_millis(self.config.rate_limit_backoff_ms);
                *self.last_update.lock() = Some(Instant::now() + backoff);
                debug!("Rate limit en el panel de guild {}, backoff aplicado", self.guild_id);
            }
            EditFailure::Other => {
                warn!("Edit del panel de guild {} falló: {error}", self.guild_id);
            }
        }
    }

    async fn delete_stale_panels(&self, ctx: &Arc<CoreContext>, channel_id: ChannelId) {
        let recent = channel_id
            .messages(&ctx.http, GetMessages::new().limit(10))
            .await;

        let Ok(recent) = recent else { return };

        for message in recent {
            let is_own_panel = message.author.id == ctx.bot_user_id
                && message
                    .embeds
                    .iter()
                    .any(|e| e.title.as_deref() == Some(embeds::NOW_PLAYING_TITLE));

            if is_own_panel {
                let _ = message.delete(&ctx.http).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn presenter() -> Arc<NowPlayingPresenter> {
        NowPlayingPresenter::new(GuildId::new(1), Arc::new(Config::default()))
    }

    #[test]
    fn test_virtual_position_smooths_outside_end_window() {
        // 1:00 de 3:00 restan 120s: solo el incremento fijo
        assert_eq!(virtual_position(60_000, 180_000), 60_300);
    }

    #[test]
    fn test_virtual_position_accelerates_near_end() {
        // Restan 5s: factor 1.5 sobre el paso de 300ms
        assert_eq!(virtual_position(175_000, 180_000), 175_450);
    }

    #[test]
    fn test_virtual_position_never_passes_end_margin() {
        assert_eq!(virtual_position(179_850, 180_000), 179_900);
        // Restan menos de 2s: salta directo al margen final
        assert_eq!(virtual_position(178_500, 180_000), 179_900);
    }

    #[test]
    fn test_virtual_position_for_streams_is_identity() {
        assert_eq!(virtual_position(123_456, 0), 123_456);
    }

    #[test]
    fn test_begin_edit_never_double_enters() {
        let presenter = presenter();

        assert!(presenter.begin_edit());
        // Un segundo edit mientras hay uno en vuelo queda suprimido
        assert!(!presenter.begin_edit());

        presenter.finish_edit();
        assert!(presenter.begin_edit());
    }

    #[test]
    fn test_min_gap_suppresses_rapid_updates() {
        let presenter = presenter();
        let now = Instant::now();

        assert!(presenter.can_update(now));

        *presenter.last_update.lock() = Some(now);
        assert!(!presenter.can_update(now + Duration::from_secs(2)));
        assert!(presenter.can_update(now + Duration::from_secs(6)));
    }

    #[test]
    fn test_rate_limit_backoff_pushes_last_update_forward() {
        let presenter = presenter();
        let now = Instant::now();

        // Simular el backoff de 30s que deja un edit rechazado
        *presenter.last_update.lock() = Some(now + Duration::from_secs(30));

        assert!(!presenter.can_update(now + Duration::from_secs(20)));
        assert!(presenter.can_update(now + Duration::from_secs(36)));
    }

    #[test]
    fn test_foreign_message_is_rejected() {
        let presenter = presenter();
        let bot = UserId::new(10);
        let stranger = UserId::new(99);

        // Un mensaje ajeno no puede convertirse en el panel
        assert!(!presenter.adopt_message(ChannelId::new(1), MessageId::new(2), stranger, bot, false));
        assert!(presenter.message.lock().is_none());

        assert!(presenter.adopt_message(ChannelId::new(1), MessageId::new(2), bot, bot, true));
        assert!(presenter.message.lock().is_some());
        // force_update deja el próximo tick libre del gap mínimo
        assert!(presenter.last_update.lock().is_none());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let presenter = presenter();
        presenter.destroy();
        presenter.destroy();
        assert!(presenter.destroyed.load(Ordering::SeqCst));
    }
}
