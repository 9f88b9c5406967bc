use serenity::cache::Cache;
use serenity::http::Http;
use serenity::model::id::UserId;
use std::sync::Arc;

use crate::activity::ActivityMonitorRegistry;
use crate::config::Config;
use crate::nodes::NodeRegistry;
use crate::now_playing::NowPlayingRegistry;
use crate::player::PlayerManager;
use crate::storage::JsonStorage;
use crate::voice_status::VoiceStatusPublisher;

/// Dependencias compartidas por los componentes de la sesión.
///
/// Se arma una sola vez cuando el bot recibe `ready` (recién ahí hay
/// http/cache utilizables) y circula como `Arc` por el despachador de
/// eventos, los timers y los handlers de interacción.
pub struct CoreContext {
    pub config: Arc<Config>,
    pub http: Arc<Http>,
    pub cache: Arc<Cache>,
    pub storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    pub registry: Arc<NodeRegistry>,
    pub manager: Arc<PlayerManager>,
    pub presenters: Arc<NowPlayingRegistry>,
    pub monitors: Arc<ActivityMonitorRegistry>,
    pub voice_status: Arc<VoiceStatusPublisher>,
    pub bot_user_id: UserId,
}
