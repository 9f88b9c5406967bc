use serenity::model::id::ChannelId;
use tracing::{debug, warn};

use crate::player::queue::QueueItem;

const MAX_STATUS_LEN: usize = 500;

/// Publica el estado textual del canal de voz.
///
/// Es un endpoint REST que serenity no expone, así que va con `reqwest`
/// directo. Todo acá es best-effort: un permiso faltante o un error del API
/// se loguea y nada más, la reproducción jamás se bloquea por esto.
pub struct VoiceStatusPublisher {
    client: reqwest::Client,
    token: String,
}

impl VoiceStatusPublisher {
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: format!("Bot {bot_token}"),
        }
    }

    /// Setea (o limpia, con `None`) el estado del canal de voz.
    pub async fn set(&self, channel_id: ChannelId, text: Option<&str>) {
        let status = text.map(truncate_status);

        let url = format!(
            "https://discord.com/api/v10/channels/{}/voice-status",
            channel_id
        );

        let result = self
            .client
            .put(&url)
            .header("Authorization", &self.token)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().as_u16() == 403 => {
                debug!("Sin permiso para el estado de voz en {}", channel_id);
            }
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "Estado de voz rechazado en {}: {}",
                    channel_id,
                    response.status()
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!("No se pudo actualizar el estado de voz en {}: {e}", channel_id);
            }
        }
    }

    pub async fn set_playing(&self, channel_id: ChannelId, track: &QueueItem) {
        let text = status_text("🎵", track);
        self.set(channel_id, Some(&text)).await;
    }

    pub async fn set_paused(&self, channel_id: ChannelId, track: &QueueItem) {
        let text = status_text("⏸️", track);
        self.set(channel_id, Some(&text)).await;
    }

    pub async fn clear(&self, channel_id: ChannelId) {
        self.set(channel_id, None).await;
    }
}

fn status_text(emoji: &str, track: &QueueItem) -> String {
    match &track.artist {
        Some(artist) => format!("{emoji} {} · {}", track.title, artist),
        None => format!("{emoji} {}", track.title),
    }
}

fn truncate_status(text: &str) -> String {
    text.chars().take(MAX_STATUS_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serenity::model::id::UserId;
    use std::time::Duration;

    #[test]
    fn test_status_truncates_at_limit() {
        let long = "á".repeat(900);
        let truncated = truncate_status(&long);
        assert_eq!(truncated.chars().count(), MAX_STATUS_LEN);
    }

    #[test]
    fn test_status_text_includes_artist() {
        let track = QueueItem {
            identifier: "x".to_string(),
            title: "Canción".to_string(),
            artist: Some("Artista".to_string()),
            duration: Some(Duration::from_secs(60)),
            thumbnail: None,
            url: "https://example.com".to_string(),
            requested_by: UserId::new(1),
            added_at: Utc::now(),
        };

        assert_eq!(status_text("🎵", &track), "🎵 Canción · Artista");
    }
}
