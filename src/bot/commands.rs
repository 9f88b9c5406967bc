//! Comandos slash del bot.
//!
//! La resolución de tracks corre en el nodo (`/v4/loadtracks`); acá solo se
//! parsean opciones, se valida el canal de voz y se responde con embeds.

use anyhow::Result;
use chrono::Utc;
use serenity::all::{CommandInteraction, CommandOptionType, Context};
use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::context::CoreContext;
use crate::player::protocol::{LoadResult, TrackData};
use crate::player::queue::{LoopMode, QueueItem};
use crate::ui::embeds;

/// Registra los comandos en una guild de desarrollo.
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, command_definitions()).await?;
    Ok(())
}

/// Registra los comandos globalmente.
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    serenity::model::application::Command::set_global_commands(&ctx.http, command_definitions())
        .await?;
    Ok(())
}

fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("play")
            .description("Reproduce una canción o playlist")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "query",
                    "URL o término de búsqueda",
                )
                .required(true),
            ),
        CreateCommand::new("pause").description("Pausa la reproducción actual"),
        CreateCommand::new("resume").description("Reanuda la reproducción pausada"),
        CreateCommand::new("skip").description("Salta a la siguiente canción"),
        CreateCommand::new("stop").description("Detiene la reproducción y desconecta el bot"),
        CreateCommand::new("shuffle").description("Activa/desactiva el modo aleatorio"),
        CreateCommand::new("loop")
            .description("Cambia el modo de repetición")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "mode", "Modo de repetición")
                    .add_string_choice("No repetir", "off")
                    .add_string_choice("Repetir canción", "track")
                    .add_string_choice("Repetir cola", "queue")
                    .required(true),
            ),
        CreateCommand::new("247").description("Activa o desactiva el modo 24/7 del servidor"),
        CreateCommand::new("node-add")
            .description("Registra tu nodo de audio privado")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "host", "Host del nodo")
                    .required(true),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "port", "Puerto del nodo")
                    .min_int_value(1)
                    .max_int_value(65535)
                    .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "password",
                    "Contraseña del nodo",
                )
                .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::Boolean,
                "secure",
                "Usar TLS (wss/https)",
            )),
        CreateCommand::new("node-remove").description("Elimina tu nodo de audio privado"),
    ]
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let name = command.data.name.clone();
    match name.as_str() {
        "play" => handle_play(ctx, command, core, guild_id).await,
        "pause" => handle_pause(ctx, command, core, guild_id, true).await,
        "resume" => handle_pause(ctx, command, core, guild_id, false).await,
        "skip" => handle_skip(ctx, command, core, guild_id).await,
        "stop" => handle_stop(ctx, command, core, guild_id).await,
        "shuffle" => handle_shuffle(ctx, command, core, guild_id).await,
        "loop" => handle_loop(ctx, command, core, guild_id).await,
        "247" => handle_always_on(ctx, command, core, guild_id).await,
        "node-add" => handle_node_add(ctx, command, core).await,
        "node-remove" => handle_node_remove(ctx, command, core).await,
        _ => respond_text(ctx, &command, "❌ Comando no reconocido").await,
    }
}

// --- Handlers ---

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
) -> Result<()> {
    let query = str_option(&command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer: resolver contra el nodo puede tardar más que la ventana de 3s
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        command
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new()
                    .embed(embeds::error_embed("Tienes que estar en un canal de voz")),
            )
            .await?;
        return Ok(());
    };

    let session = core
        .manager
        .get_or_create(guild_id, voice_channel, command.channel_id, command.user.id.get())
        .await?;

    let identifier = if query.starts_with("http") {
        query.clone()
    } else {
        format!("ytsearch:{query}")
    };

    let loaded = session.link().load_track(&identifier).await?;

    let (first, rest, playlist_name) = match loaded {
        LoadResult::Track(track) => (Some(track), Vec::new(), None),
        LoadResult::Search(mut tracks) => {
            if tracks.is_empty() {
                (None, Vec::new(), None)
            } else {
                (Some(tracks.remove(0)), Vec::new(), None)
            }
        }
        LoadResult::Playlist(playlist) => {
            let mut tracks = playlist.tracks;
            if tracks.is_empty() {
                (None, Vec::new(), None)
            } else {
                (Some(tracks.remove(0)), tracks, Some(playlist.info.name))
            }
        }
        LoadResult::Empty {} => (None, Vec::new(), None),
        LoadResult::Error(exception) => {
            let detail = exception.message.unwrap_or(exception.severity);
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().embed(embeds::error_embed(&detail)),
                )
                .await?;
            return Ok(());
        }
    };

    let Some(first) = first else {
        command
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new()
                    .embed(embeds::error_embed("No se encontraron resultados")),
            )
            .await?;
        return Ok(());
    };

    let first_item = queue_item_from(&first, command.user.id);
    let total = 1 + rest.len();

    core.manager
        .play(
            core,
            guild_id,
            voice_channel,
            command.channel_id,
            command.user.id.get(),
            first_item.clone(),
        )
        .await?;

    for track in &rest {
        let _ = session.enqueue(queue_item_from(track, command.user.id)).await;
    }

    let embed = match playlist_name {
        Some(name) => embeds::playlist_added_embed(&name, total),
        None => embeds::track_added_embed(&first_item),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn handle_pause(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
    pause: bool,
) -> Result<()> {
    let Some(session) = core.manager.get(guild_id) else {
        return respond_text(ctx, &command, "❌ No hay nada reproduciéndose").await;
    };

    session.pause(pause).await?;

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

    respond_text(ctx, &command, if pause { "⏸️ Pausado" } else { "▶️ Reanudado" }).await
}

async fn handle_skip(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = core.manager.get(guild_id) else {
        return respond_text(ctx, &command, "❌ No hay nada reproduciéndose").await;
    };

    if session.start_next().await? {
        respond_text(ctx, &command, "⏭️ Saltado").await
    } else {
        session.stop().await?;
        core.voice_status.clear(session.voice_channel_id()).await;
        crate::cleanup::schedule_idle_cleanup(Arc::clone(core), guild_id);
        respond_text(ctx, &command, "📭 No quedan canciones en la cola").await
    }
}

async fn handle_stop(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
) -> Result<()> {
    core.manager.stop(core, guild_id).await;
    respond_text(ctx, &command, "⏹️ Reproducción detenida").await
}

async fn handle_shuffle(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = core.manager.get(guild_id) else {
        return respond_text(ctx, &command, "❌ No hay nada reproduciéndose").await;
    };

    let text = if session.toggle_shuffle() {
        "🔀 Modo aleatorio activado"
    } else {
        "➡️ Modo aleatorio desactivado"
    };
    respond_text(ctx, &command, text).await
}

async fn handle_loop(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = core.manager.get(guild_id) else {
        return respond_text(ctx, &command, "❌ No hay nada reproduciéndose").await;
    };

    let (mode, text) = match str_option(&command, "mode") {
        Some("track") => (LoopMode::Track, "🔂 Repetir canción activado"),
        Some("queue") => (LoopMode::Queue, "🔁 Repetir cola activado"),
        _ => (LoopMode::Off, "➡️ Repetición desactivada"),
    };

    session.set_loop_mode(mode);
    respond_text(ctx, &command, text).await
}

async fn handle_always_on(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
    guild_id: GuildId,
) -> Result<()> {
    let enabled = {
        let mut storage = core.storage.lock().await;
        let current = storage.get_guild_settings(guild_id.get()).await?.always_on;
        storage.set_always_on(guild_id.get(), !current).await?;
        !current
    };

    let text = if enabled {
        "🕐 Modo 24/7 activado: el bot se queda aunque el canal quede vacío"
    } else {
        "🕐 Modo 24/7 desactivado"
    };
    respond_text(ctx, &command, text).await
}

async fn handle_node_add(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
) -> Result<()> {
    let host = str_option(&command, "host").unwrap_or_default().to_string();
    let port = int_option(&command, "port").unwrap_or(0) as u16;
    let password = str_option(&command, "password").unwrap_or_default().to_string();
    let secure = bool_option(&command, "secure").unwrap_or(false);

    // La prueba de conectividad puede tomar hasta 10 segundos
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(
                CreateInteractionResponseMessage::new().ephemeral(true),
            ),
        )
        .await?;

    let result = core
        .registry
        .register_private_node(command.user.id.get(), &host, port, &password, secure)
        .await;

    let embed = match result {
        Ok(_) => embeds::node_registered_embed(&host, port),
        Err(e) => embeds::error_embed(&e.to_string()),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn handle_node_remove(
    ctx: &Context,
    command: CommandInteraction,
    core: &Arc<CoreContext>,
) -> Result<()> {
    let result = core
        .registry
        .unregister_private_node(command.user.id.get())
        .await;

    let text = match result {
        Ok(()) => "🗑️ Tu nodo privado fue eliminado".to_string(),
        Err(e) => format!("❌ {e}"),
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

// --- Helpers ---

async fn respond_text(ctx: &Context, command: &CommandInteraction, text: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(text),
            ),
        )
        .await?;
    Ok(())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| guild.voice_states.get(&user_id).and_then(|vs| vs.channel_id))
}

fn str_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

fn queue_item_from(track: &TrackData, requested_by: UserId) -> QueueItem {
    QueueItem {
        identifier: track
            .info
            .uri
            .clone()
            .unwrap_or_else(|| track.info.identifier.clone()),
        title: track.info.title.clone(),
        artist: Some(track.info.author.clone()),
        duration: if track.info.is_stream || track.info.length == 0 {
            None
        } else {
            Some(Duration::from_millis(track.info.length))
        },
        thumbnail: track.info.artwork_url.clone(),
        url: track.info.uri.clone().unwrap_or_default(),
        requested_by,
        added_at: Utc::now(),
    }
}
