use serenity::all::Timestamp;
use serenity::builder::{CreateEmbed, CreateEmbedFooter};

use crate::player::queue::QueueItem;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Nexus Music";

/// Título del panel; también sirve para reconocer paneles viejos propios.
pub const NOW_PLAYING_TITLE: &str = "🎵 Reproduciendo Ahora";

/// Crea el embed del panel de reproducción con barra de progreso
pub fn now_playing_embed(
    track: &QueueItem,
    position_ms: u64,
    duration_ms: u64,
    paused: bool,
) -> CreateEmbed {
    let state_line = if paused { "⏸️ En pausa" } else { "▶️ Sonando" };

    let mut embed = CreateEmbed::default()
        .title(NOW_PLAYING_TITLE)
        .description(format!("**{}**\n{}", track.title, state_line))
        .color(if paused {
            colors::NEUTRAL_GRAY
        } else {
            colors::SUCCESS_GREEN
        })
        .field(
            "🎤 Artista",
            track.artist.clone().unwrap_or_else(|| "Desconocido".to_string()),
            true,
        );

    if duration_ms > 0 {
        embed = embed
            .field("⏱️ Duración", format_duration_ms(duration_ms), true)
            .field(
                "📍 Progreso",
                format!(
                    "{} `{} / {}`",
                    progress_bar(position_ms, duration_ms),
                    format_duration_ms(position_ms),
                    format_duration_ms(duration_ms)
                ),
                false,
            );
    } else {
        embed = embed.field("⏱️ Duración", "🔴 En vivo", true);
    }

    embed = embed.field("👤 Solicitado por", format!("<@{}>", track.requested_by), true);

    if let Some(thumbnail) = track.thumbnail.clone() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(track.url.clone())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Prompt interactivo del chequeo de actividad
pub fn activity_check_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("👋 ¿Sigues ahí?")
        .description(
            "Llevas mucho tiempo escuchando música. Confirma que sigues ahí \
             o el bot se desconectará en **5 minutos**.",
        )
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Estado terminal del prompt cuando alguien confirmó
pub fn activity_confirmed_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ ¡Seguimos con la música!")
        .description("Actividad confirmada. El próximo chequeo será en 6 horas.")
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Estado terminal del prompt cuando nadie respondió
pub fn activity_timeout_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("💤 Sin respuesta")
        .description("Nadie confirmó el chequeo de actividad.")
        .color(colors::NEUTRAL_GRAY)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso de desconexión por inactividad
pub fn inactivity_disconnect_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🔌 Desconectado por inactividad")
        .description("La sesión se cerró porque nadie confirmó que seguía escuchando.")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso de pausa porque el canal de voz quedó vacío
pub fn paused_empty_channel_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("⏸️ Música en pausa")
        .description(
            "El canal de voz quedó vacío. Si nadie vuelve en **5 minutos**, \
             el bot se desconectará.",
        )
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso de desconexión porque el canal siguió vacío
pub fn empty_channel_disconnect_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🔌 Desconectado")
        .description("El canal de voz siguió vacío, así que el bot se retiró.")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso transitorio de reanudación
pub fn resumed_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("▶️ Música reanudada")
        .description("¡Alguien volvió al canal! Seguimos donde quedamos.")
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn track_added_embed(track: &QueueItem) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}** se agregó a la cola de reproducción", track.title))
        .color(colors::SUCCESS_GREEN)
        .field(
            "🎤 Artista",
            track.artist.clone().unwrap_or_else(|| "Desconocido".to_string()),
            true,
        );

    if let Some(duration) = track.duration {
        embed = embed.field("⏱️ Duración", format_duration_ms(duration.as_millis() as u64), true);
    } else {
        embed = embed.field("⏱️ Duración", "🔴 En vivo", true);
    }

    embed
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para una playlist agregada
pub fn playlist_added_embed(name: &str, track_count: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("📋 Playlist Agregada")
        .description(format!(
            "Se agregaron **{track_count} canciones** de **{name}** a la cola"
        ))
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Confirmación de registro de un nodo privado
pub fn node_registered_embed(host: &str, port: u16) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎛️ Nodo privado registrado")
        .description(format!(
            "Tu nodo **{host}:{port}** pasó la prueba de conexión. \
             Tus próximas sesiones lo van a usar."
        ))
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed genérico de error para respuestas de comandos
pub fn error_embed(detail: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(detail.to_string())
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso de error de reproducción de un track
pub fn track_error_embed(title: &str, detail: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error de reproducción")
        .description(format!("**{title}** no se pudo reproducir: {detail}"))
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Barra de progreso estilo reproductor
fn progress_bar(position_ms: u64, duration_ms: u64) -> String {
    const SEGMENTS: u64 = 12;

    let filled = if duration_ms == 0 {
        0
    } else {
        ((position_ms.min(duration_ms) * SEGMENTS) / duration_ms).min(SEGMENTS - 1)
    };

    let mut bar = String::new();
    for i in 0..SEGMENTS {
        if i == filled {
            bar.push_str("🔘");
        } else {
            bar.push_str("▬");
        }
    }
    bar
}

/// Formatea una duración como m:ss (o h:mm:ss)
fn format_duration_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(65_000), "1:05");
        assert_eq!(format_duration_ms(3_725_000), "1:02:05");
        assert_eq!(format_duration_ms(0), "0:00");
    }

    #[test]
    fn test_progress_bar_bounds() {
        let start = progress_bar(0, 180_000);
        assert!(start.starts_with("🔘"));

        // Una posición que se pasó del final queda clavada en el último segmento
        let past_end = progress_bar(200_000, 180_000);
        assert!(past_end.ends_with("🔘"));
    }
}
