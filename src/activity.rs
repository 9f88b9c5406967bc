//! Chequeo de actividad de sesiones largas.
//!
//! Cada guild con sesión viva tiene exactamente un monitor, obtenido de un
//! registro keyed y destruido explícitamente en todo camino de teardown.
//! Cada 6 horas el monitor pregunta en el canal de texto si alguien sigue
//! escuchando; sin respuesta en 5 minutos, la sesión se destruye.
//! `is_pending` es la única fuente de verdad contra chequeos solapados.

use dashmap::DashMap;
use serenity::builder::{CreateMessage, EditMessage};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::CoreContext;
use crate::ui::{buttons, embeds};

pub struct ActivityMonitorRegistry {
    map: DashMap<GuildId, Arc<ActivityMonitor>>,
    config: Arc<Config>,
}

impl ActivityMonitorRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            map: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<ActivityMonitor>> {
        self.map.get(&guild_id).map(|m| Arc::clone(&m))
    }

    /// Garantiza que el guild tenga su monitor, con el timer de chequeo andando.
    pub fn ensure_instance(&self, guild_id: GuildId, ctx: &Arc<CoreContext>) -> Arc<ActivityMonitor> {
        if let Some(monitor) = self.get(guild_id) {
            return monitor;
        }

        let monitor = ActivityMonitor::new(guild_id, Arc::clone(&self.config));
        monitor.arm_check_timer(ctx);
        self.map.insert(guild_id, Arc::clone(&monitor));

        debug!("Monitor de actividad creado para guild {}", guild_id);
        monitor
    }

    /// Obligatorio en cada teardown de sesión; si no, el monitor se filtra.
    pub fn remove_instance(&self, guild_id: GuildId) {
        if let Some((_, monitor)) = self.map.remove(&guild_id) {
            monitor.destroy();
        }
    }
}

pub struct ActivityMonitor {
    guild_id: GuildId,
    config: Arc<Config>,
    me: Weak<ActivityMonitor>,
    session_start: parking_lot::Mutex<Instant>,
    is_pending: AtomicBool,
    active_message: parking_lot::Mutex<Option<(ChannelId, MessageId)>>,
    check_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    response_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ActivityMonitor {
    fn new(guild_id: GuildId, config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            guild_id,
            config,
            me: me.clone(),
            session_start: parking_lot::Mutex::new(Instant::now()),
            is_pending: AtomicBool::new(false),
            active_message: parking_lot::Mutex::new(None),
            check_task: parking_lot::Mutex::new(None),
            response_task: parking_lot::Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// (Re)arma la ventana de 6 horas hasta el próximo chequeo.
    fn arm_check_timer(&self, ctx: &Arc<CoreContext>) {
        let Some(monitor) = self.me.upgrade() else {
            return;
        };
        let ctx = Arc::clone(ctx);
        let interval = self.config.activity_check_interval();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // Soltar el propio handle antes de seguir
            let _ = monitor.check_task.lock().take();
            monitor.send_activity_check(&ctx).await;
        });

        if let Some(old) = self.check_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// Manda el prompt interactivo de "¿sigues escuchando?".
    async fn send_activity_check(&self, ctx: &Arc<CoreContext>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let Some(session) = ctx.manager.get(self.guild_id) else {
            return;
        };

        // Sin track o sesión totalmente parada: no hay nada que confirmar
        if session.current_track().is_none() || (!session.is_playing() && !session.is_paused()) {
            self.arm_check_timer(ctx);
            return;
        }

        // Nunca dos chequeos solapados
        if !self.begin_pending() {
            return;
        }

        let channel = session.text_channel_id();
        let result = channel
            .send_message(
                &ctx.http,
                CreateMessage::new()
                    .embed(embeds::activity_check_embed())
                    .components(vec![buttons::activity_confirm_row(false)]),
            )
            .await;

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                // Sin canal o sin permisos: no dejar la sesión colgada del
                // estado pendiente, rearmar y seguir
                error!("No se pudo enviar el chequeo de actividad en {}: {e}", self.guild_id);
                self.is_pending.store(false, Ordering::SeqCst);
                self.arm_check_timer(ctx);
                return;
            }
        };

        info!("⏰ Chequeo de actividad enviado en guild {}", self.guild_id);
        *self.active_message.lock() = Some((channel, message.id));

        let Some(monitor) = self.me.upgrade() else {
            return;
        };
        let ctx_task = Arc::clone(ctx);
        let window = self.config.activity_response_timeout();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = monitor.response_task.lock().take();
            monitor.on_response_timeout(&ctx_task).await;
        });

        if let Some(old) = self.response_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// Alguien confirmó que sigue escuchando.
    ///
    /// Devuelve false si llegó tarde (el timeout ya corrió o no había
    /// chequeo pendiente): en ese caso es un no-op.
    pub async fn on_continue_confirmed(&self, ctx: &Arc<CoreContext>) -> bool {
        if !self.confirm_state(Instant::now()) {
            return false;
        }

        if let Some(handle) = self.response_task.lock().take() {
            handle.abort();
        }

        self.arm_check_timer(ctx);

        // Estado terminal del prompt: confirmado, control apagado
        let reference = *self.active_message.lock();
        if let Some((channel, message_id)) = reference {
            let result = channel
                .edit_message(
                    &ctx.http,
                    message_id,
                    EditMessage::new()
                        .embed(embeds::activity_confirmed_embed())
                        .components(vec![buttons::activity_confirm_row(true)]),
                )
                .await;

            if let Err(e) = result {
                debug!("No se pudo editar el chequeo confirmado en {}: {e}", self.guild_id);
            }
        }
        *self.active_message.lock() = None;

        info!("✅ Actividad confirmada en guild {}", self.guild_id);
        true
    }

    /// Venció la ventana de respuesta: desconectar.
    async fn on_response_timeout(&self, ctx: &Arc<CoreContext>) {
        // Si ya no está pendiente (confirmado o destruido), no hay timeout
        if !self.clear_pending() {
            return;
        }

        let reference = self.active_message.lock().take();
        if let Some((channel, message_id)) = reference {
            let _ = channel
                .edit_message(
                    &ctx.http,
                    message_id,
                    EditMessage::new()
                        .embed(embeds::activity_timeout_embed())
                        .components(vec![buttons::activity_confirm_row(true)]),
                )
                .await;

            let _ = channel
                .send_message(
                    &ctx.http,
                    CreateMessage::new().embed(embeds::inactivity_disconnect_embed()),
                )
                .await;
        }

        warn!("💤 Sin respuesta al chequeo de actividad en guild {}, desconectando", self.guild_id);

        ctx.monitors.remove_instance(self.guild_id);
        ctx.manager.destroy_session(ctx, self.guild_id).await;
    }

    /// Destruye el monitor: corta ambos timers y suelta el mensaje. Idempotente.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.is_pending.store(false, Ordering::SeqCst);

        if let Some(handle) = self.check_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.response_task.lock().take() {
            handle.abort();
        }

        *self.active_message.lock() = None;
    }

    // --- Transiciones de estado puras (testeables sin Discord) ---

    fn begin_pending(&self) -> bool {
        self.is_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn clear_pending(&self) -> bool {
        self.is_pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Transición de confirmación: solo válida con un chequeo pendiente.
    fn confirm_state(&self, now: Instant) -> bool {
        if !self.clear_pending() {
            return false;
        }
        *self.session_start.lock() = now;
        true
    }

    #[allow(dead_code)]
    pub fn is_pending(&self) -> bool {
        self.is_pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> Arc<ActivityMonitor> {
        ActivityMonitor::new(GuildId::new(1), Arc::new(Config::default()))
    }

    #[test]
    fn test_no_overlapping_checks() {
        let monitor = monitor();

        assert!(monitor.begin_pending());
        // Un segundo chequeo mientras hay uno pendiente queda bloqueado
        assert!(!monitor.begin_pending());
    }

    #[test]
    fn test_confirm_resets_session_start_and_clears_pending() {
        let monitor = monitor();
        let before = *monitor.session_start.lock();

        monitor.begin_pending();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let now = Instant::now();
        assert!(monitor.confirm_state(now));
        assert!(!monitor.is_pending());
        assert!(*monitor.session_start.lock() > before);
    }

    #[test]
    fn test_late_confirm_is_noop() {
        let monitor = monitor();

        // Nada pendiente (el timeout ya corrió): confirmar no hace nada
        assert!(!monitor.confirm_state(Instant::now()));
    }

    #[test]
    fn test_timeout_without_pending_is_impossible() {
        let monitor = monitor();

        // El guard de clear_pending es el mismo que usa on_response_timeout
        assert!(!monitor.clear_pending());

        monitor.begin_pending();
        assert!(monitor.clear_pending());
        // Un segundo timeout sobre el mismo chequeo tampoco pasa
        assert!(!monitor.clear_pending());
    }

    #[test]
    fn test_destroy_is_idempotent_and_clears_state() {
        let monitor = monitor();
        monitor.begin_pending();
        *monitor.active_message.lock() = Some((ChannelId::new(2), MessageId::new(3)));

        monitor.destroy();
        monitor.destroy();

        assert!(!monitor.is_pending());
        assert!(monitor.active_message.lock().is_none());
    }
}
