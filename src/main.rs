use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod activity;
mod bot;
mod cleanup;
mod config;
mod context;
mod error;
mod nodes;
mod now_playing;
mod player;
mod storage;
mod ui;
mod voice_status;

use crate::activity::ActivityMonitorRegistry;
use crate::bot::NexusBot;
use crate::config::Config;
use crate::nodes::probe::WsProbe;
use crate::nodes::NodeRegistry;
use crate::now_playing::NowPlayingRegistry;
use crate::player::PlayerManager;
use crate::storage::JsonStorage;
use crate::voice_status::VoiceStatusPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nexus_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Nexus Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Inicializar almacenamiento JSON
    let storage = Arc::new(tokio::sync::Mutex::new(
        JsonStorage::new(config.data_dir.clone()).await?,
    ));

    // Canal por el que los nodos entregan sus eventos al despachador
    let (events_tx, events_rx) = flume::unbounded();

    // Registro de nodos con su prueba de conectividad real
    let probe = Arc::new(WsProbe::new(
        config.node_connect_timeout(),
        config.node_connect_poll(),
    ));
    let registry = NodeRegistry::new(Arc::clone(&config), Arc::clone(&storage), probe, events_tx);

    // Gateway de voz compartido con serenity
    let songbird = Songbird::serenity();

    let manager = Arc::new(PlayerManager::new(
        Arc::clone(&registry),
        Arc::clone(&songbird),
        Arc::clone(&config),
    ));
    registry.set_session_index(Arc::clone(&manager) as Arc<dyn crate::nodes::SessionIndex>);

    let presenters = Arc::new(NowPlayingRegistry::new(Arc::clone(&config)));
    let monitors = Arc::new(ActivityMonitorRegistry::new(Arc::clone(&config)));
    let voice_status = Arc::new(VoiceStatusPublisher::new(&config.discord_token));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Crear handler del bot
    let handler = NexusBot::new(
        Arc::clone(&config),
        storage,
        registry,
        manager,
        presenters,
        monitors,
        voice_status,
        events_rx,
    );

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
