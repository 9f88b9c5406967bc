//! Tipos de mensajes intercambiados con los nodos de audio.
//!
//! El bot es cliente del protocolo de los nodos: ops de control por
//! WebSocket (`voiceUpdate`, `play`, `stop`, `destroy`) y un PATCH REST
//! para pausa/posición/volumen. Los eventos llegan por el mismo socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mensajes del bot hacia el nodo.
#[derive(Debug, Serialize)]
#[serde(tag = "op")]
#[serde(rename_all = "camelCase")]
pub enum OutgoingOp {
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        channel_id: Option<String>,
        event: Value,
    },
    Play {
        guild_id: String,
        track: String,
    },
    Stop {
        guild_id: String,
    },
    Destroy {
        guild_id: String,
    },
}

/// Mensajes del nodo hacia el bot.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum NodeMessage {
    Ready {
        resumed: bool,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: String,
        state: PlayerState,
    },
    Stats(NodeStats),
    Event(NodeEvent),
}

/// Estado periódico del player reportado por el nodo.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerState {
    pub time: u64,
    pub position: u64,
    pub connected: bool,
    pub ping: i32,
}

/// Estadísticas del nodo. Solo se usan para logging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub playing_players: u32,
    #[serde(default)]
    pub uptime: u64,
}

/// Eventos del player emitidos por el nodo.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: String, track: TrackData },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: String,
        track: TrackData,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: String,
        track: TrackData,
        exception: TrackException,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: String,
        track: TrackData,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },

    /// Eventos de plugins (letras, etc.) que este bot no consume.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Si el bot debe avanzar la cola tras este fin de track.
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub cause: String,
}

/// Track tal como lo describe el nodo.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Value,
    #[serde(default)]
    pub user_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duración en milisegundos. 0 para streams.
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}

/// Resultado del endpoint REST `/v4/loadtracks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(TrackData),
    Playlist(PlaylistData),
    Search(Vec<TrackData>),
    Empty {},
    Error(TrackException),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: Value,
    pub tracks: Vec<TrackData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    pub selected_track: i32,
}

/// Cuerpo del PATCH REST `/v4/sessions/{session}/players/{guild}`.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_play_op_shape() {
        let op = OutgoingOp::Play {
            guild_id: "123".to_string(),
            track: "https://example.com/song".to_string(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "play");
        assert_eq!(json["guild_id"], "123");
    }

    #[test]
    fn test_ready_message_parses() {
        let raw = r#"{"op":"ready","resumed":false,"sessionId":"abc123"}"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        match msg {
            NodeMessage::Ready { resumed, session_id } => {
                assert!(!resumed);
                assert_eq!(session_id, "abc123");
            }
            other => panic!("mensaje inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_track_end_event_parses() {
        let raw = r#"{
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "42",
            "track": {
                "encoded": "QAAA",
                "info": {
                    "identifier": "abc",
                    "isSeekable": true,
                    "author": "Autora",
                    "length": 180000,
                    "isStream": false,
                    "position": 0,
                    "title": "Canción",
                    "uri": "https://example.com/t",
                    "artworkUrl": null,
                    "isrc": null,
                    "sourceName": "http"
                }
            },
            "reason": "finished"
        }"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        match msg {
            NodeMessage::Event(NodeEvent::TrackEnd { guild_id, reason, track }) => {
                assert_eq!(guild_id, "42");
                assert_eq!(reason, TrackEndReason::Finished);
                assert!(reason.may_start_next());
                assert_eq!(track.info.title, "Canción");
            }
            other => panic!("mensaje inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_stopped_track_does_not_auto_advance() {
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
    }

    #[test]
    fn test_update_request_skips_unset_fields() {
        let req = PlayerUpdateRequest {
            paused: Some(true),
            ..PlayerUpdateRequest::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"paused":true}"#);
    }
}
