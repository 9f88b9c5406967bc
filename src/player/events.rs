use serenity::model::id::GuildId;

use crate::player::protocol::{PlayerState, TrackData, TrackEndReason};

/// Eventos ya mapeados al dominio del bot.
///
/// El lector del WebSocket de cada nodo traduce los mensajes del protocolo a
/// este enum y los envía por un canal `flume` al despachador central. Hay
/// exactamente un handler por tipo de evento por sesión, no broadcast.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    NodeReady {
        node_id: String,
        resumed: bool,
    },
    NodeDisconnected {
        node_id: String,
    },
    TrackStart {
        guild_id: GuildId,
        track: TrackData,
    },
    TrackEnd {
        guild_id: GuildId,
        track: TrackData,
        reason: TrackEndReason,
    },
    TrackException {
        guild_id: GuildId,
        track: TrackData,
        message: String,
    },
    TrackStuck {
        guild_id: GuildId,
        threshold_ms: u64,
    },
    StateUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
    /// El socket de voz entre el nodo y Discord se cerró.
    VoiceSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
    },
}
