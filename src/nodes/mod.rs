//! Registro de nodos de audio.
//!
//! Mantiene el pool de nodos (el compartido por defecto más los privados de
//! cada usuario), sus pruebas de conectividad, el conteo de fallas y el
//! auto-apagado de nodos poco confiables. Las sesiones consultan aquí qué
//! nodo usar; la selección es pegajosa: una sesión viva nunca se migra.

pub mod health;
pub mod probe;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::NodeError;
use crate::player::events::PlayerEvent;
use crate::player::link::NodeLink;
use crate::storage::{JsonStorage, NodeRecord};
use probe::NodeProbe;

/// Identificador con el que se registra el nodo privado de un usuario.
pub fn private_node_id(user_id: u64) -> String {
    format!("private-{user_id}")
}

/// Solo los nodos privados participan del auto-apagado por fallas.
pub fn is_private_node_id(identifier: &str) -> bool {
    identifier.starts_with("private-")
}

fn host_is_valid(host: &str) -> bool {
    static HOST_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = HOST_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]*$").expect("regex de host")
    });
    re.is_match(host)
}

/// Configuración y bookkeeping de salud de un nodo.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub identifier: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    /// None para los nodos compartidos del pool por defecto.
    pub owner_user_id: Option<u64>,
    pub retry_count: u32,
    pub is_active: bool,
    pub auto_fallback: bool,
    pub last_error: Option<String>,
    pub added_at: DateTime<Utc>,
}

struct NodeEntry {
    config: NodeConfig,
    link: Arc<NodeLink>,
}

/// Vista del registro sobre las sesiones vivas.
///
/// Rompe la dependencia circular con el `PlayerManager` y da un seam para
/// los tests.
pub trait SessionIndex: Send + Sync {
    fn node_for_guild(&self, guild_id: GuildId) -> Option<String>;
    fn is_node_in_use(&self, node_id: &str) -> bool;
}

pub struct NodeRegistry {
    nodes: DashMap<String, NodeEntry>,
    probe: Arc<dyn NodeProbe>,
    storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    sessions: OnceLock<Arc<dyn SessionIndex>>,
    config: Arc<Config>,
    bot_user_id: OnceLock<u64>,
    events_tx: flume::Sender<PlayerEvent>,
    me: Weak<NodeRegistry>,
}

impl NodeRegistry {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<tokio::sync::Mutex<JsonStorage>>,
        probe: Arc<dyn NodeProbe>,
        events_tx: flume::Sender<PlayerEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            nodes: DashMap::new(),
            probe,
            storage,
            sessions: OnceLock::new(),
            config,
            bot_user_id: OnceLock::new(),
            events_tx,
            me: me.clone(),
        })
    }

    fn spawn_health_poll(&self, identifier: String) {
        if let Some(registry) = self.me.upgrade() {
            health::spawn_health_poll(registry, identifier);
        }
    }

    pub fn set_session_index(&self, index: Arc<dyn SessionIndex>) {
        let _ = self.sessions.set(index);
    }

    pub fn set_bot_user_id(&self, user_id: u64) {
        let _ = self.bot_user_id.set(user_id);
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn bot_user_id(&self) -> u64 {
        self.bot_user_id.get().copied().unwrap_or(0)
    }

    fn make_link(
        &self,
        identifier: &str,
        host: &str,
        port: u16,
        password: &str,
        secure: bool,
    ) -> Arc<NodeLink> {
        NodeLink::new(
            identifier.to_string(),
            host.to_string(),
            port,
            password.to_string(),
            secure,
            self.bot_user_id(),
            self.events_tx.clone(),
        )
    }

    /// Crea y conecta el nodo compartido por defecto.
    pub async fn init_default_node(&self) {
        let link = self.make_link(
            "default",
            &self.config.default_node_host,
            self.config.default_node_port,
            &self.config.default_node_password,
            self.config.default_node_secure,
        );

        if let Err(e) = link.connect().await {
            warn!("⚠️ No se pudo conectar al nodo por defecto: {e:?}");
        }

        self.nodes.insert(
            "default".to_string(),
            NodeEntry {
                config: NodeConfig {
                    identifier: "default".to_string(),
                    host: self.config.default_node_host.clone(),
                    port: self.config.default_node_port,
                    password: self.config.default_node_password.clone(),
                    secure: self.config.default_node_secure,
                    owner_user_id: None,
                    retry_count: 0,
                    is_active: true,
                    auto_fallback: false,
                    last_error: None,
                    added_at: Utc::now(),
                },
                link,
            },
        );

        info!(
            "🎼 Nodo por defecto registrado: {}:{}",
            self.config.default_node_host, self.config.default_node_port
        );
    }

    /// Restaura los nodos privados persistidos al arrancar.
    pub async fn restore_persisted_nodes(&self) {
        let records = self.storage.lock().await.all_node_records();

        for record in records {
            let identifier = private_node_id(record.user_id);
            let link = self.make_link(
                &identifier,
                &record.host,
                record.port,
                &record.password,
                record.secure,
            );

            if record.is_active {
                let link_task = Arc::clone(&link);
                tokio::spawn(async move {
                    if let Err(e) = link_task.connect().await {
                        warn!(
                            "⚠️ Nodo privado {} inalcanzable al restaurar: {e:?}",
                            link_task.identifier
                        );
                    }
                });
            }

            self.nodes.insert(
                identifier.clone(),
                NodeEntry {
                    config: NodeConfig {
                        identifier: identifier.clone(),
                        host: record.host.clone(),
                        port: record.port,
                        password: record.password.clone(),
                        secure: record.secure,
                        owner_user_id: Some(record.user_id),
                        retry_count: record.retry_count,
                        is_active: record.is_active,
                        auto_fallback: record.auto_fallback,
                        last_error: record.last_error.clone(),
                        added_at: record.added_at,
                    },
                    link,
                },
            );

            self.spawn_health_poll(identifier);
        }
    }

    /// Registra el nodo privado de un usuario.
    ///
    /// El orden importa: primero las validaciones baratas, después la prueba
    /// de conectividad, y recién con la prueba aprobada se persiste y se
    /// registra. Ningún camino de error deja estado a medias.
    pub async fn register_private_node(
        &self,
        owner_user_id: u64,
        host: &str,
        port: u16,
        password: &str,
        secure: bool,
    ) -> Result<String, NodeError> {
        if !host_is_valid(host) {
            return Err(NodeError::InvalidHost);
        }

        if self.storage.lock().await.get_node_record(owner_user_id).is_some() {
            return Err(NodeError::DuplicateOwner);
        }

        let identifier = private_node_id(owner_user_id);
        if self.nodes.contains_key(&identifier) {
            return Err(NodeError::DuplicateIdentifier(identifier));
        }

        // Prueba de conectividad con un socket temporal; se descarta siempre
        self.probe.probe(host, port, password, secure).await?;

        let record = NodeRecord {
            user_id: owner_user_id,
            host: host.to_string(),
            port,
            password: password.to_string(),
            secure,
            retry_count: 0,
            is_active: true,
            auto_fallback: true,
            last_error: None,
            added_at: Utc::now(),
        };
        self.storage
            .lock()
            .await
            .save_node_record(&record)
            .await
            .map_err(NodeError::Storage)?;

        let link = self.make_link(&identifier, host, port, password, secure);
        let link_task = Arc::clone(&link);
        tokio::spawn(async move {
            if let Err(e) = link_task.connect().await {
                warn!("⚠️ Nodo privado {} no conectó tras registrarse: {e:?}", link_task.identifier);
            }
        });

        self.nodes.insert(
            identifier.clone(),
            NodeEntry {
                config: NodeConfig {
                    identifier: identifier.clone(),
                    host: host.to_string(),
                    port,
                    password: password.to_string(),
                    secure,
                    owner_user_id: Some(owner_user_id),
                    retry_count: 0,
                    is_active: true,
                    auto_fallback: true,
                    last_error: None,
                    added_at: record.added_at,
                },
                link,
            },
        );

        self.spawn_health_poll(identifier.clone());

        info!("🎛️ Nodo privado registrado: {} ({}:{})", identifier, host, port);
        Ok(identifier)
    }

    /// Elimina el nodo privado de un usuario.
    ///
    /// Se niega si una sesión viva sigue atada al nodo: quitarle el piso a
    /// una reproducción en curso no es una opción.
    pub async fn unregister_private_node(&self, owner_user_id: u64) -> Result<(), NodeError> {
        let identifier = private_node_id(owner_user_id);

        let link = match self.nodes.get(&identifier) {
            Some(entry) => Arc::clone(&entry.link),
            None => return Err(NodeError::NotFound),
        };

        if let Some(index) = self.sessions.get() {
            if index.is_node_in_use(&identifier) {
                return Err(NodeError::NodeInUse);
            }
        }

        link.disconnect().await;
        self.nodes.remove(&identifier);
        self.storage
            .lock()
            .await
            .delete_node_record(owner_user_id)
            .await
            .map_err(NodeError::Storage)?;

        info!("🗑️ Nodo privado {} eliminado", identifier);
        Ok(())
    }

    /// Elige el nodo para una sesión nueva o existente.
    ///
    /// Una sesión existente conserva su nodo (binding pegajoso). Para una
    /// sesión nueva se prefiere el nodo privado del solicitante si está
    /// activo y conectado; `None` manda al caller al pool compartido.
    pub fn select_node_for_session(&self, user_id: u64, guild_id: GuildId) -> Option<String> {
        if let Some(index) = self.sessions.get() {
            if let Some(bound) = index.node_for_guild(guild_id) {
                return Some(bound);
            }
        }

        let identifier = private_node_id(user_id);
        let entry = self.nodes.get(&identifier)?;
        if entry.config.is_active && entry.link.is_connected() {
            Some(identifier)
        } else {
            None
        }
    }

    /// Acumula una falla reportada por el chequeo de salud.
    pub async fn report_node_failure(&self, node_id: &str, reason: &str) {
        if !is_private_node_id(node_id) {
            return;
        }

        let (owner, snapshot) = {
            let mut entry = match self.nodes.get_mut(node_id) {
                Some(entry) => entry,
                None => return,
            };

            entry.config.retry_count += 1;

            if entry.config.retry_count >= self.config.node_max_retries
                && entry.config.auto_fallback
                && entry.config.is_active
            {
                entry.config.is_active = false;
                entry.config.last_error = Some(reason.to_string());
                warn!(
                    "🚫 Nodo {} desactivado tras {} fallas: {}",
                    node_id, entry.config.retry_count, reason
                );
            }

            (entry.config.owner_user_id, entry.config.clone())
        };

        if let Some(owner) = owner {
            self.persist_health(owner, &snapshot).await;
        }
    }

    /// Limpia el bookkeeping de fallas cuando el nodo vuelve a responder.
    pub async fn report_node_recovered(&self, node_id: &str) {
        let (owner, snapshot) = {
            let mut entry = match self.nodes.get_mut(node_id) {
                Some(entry) => entry,
                None => return,
            };

            if entry.config.retry_count == 0 && entry.config.last_error.is_none() {
                return;
            }

            entry.config.retry_count = 0;
            entry.config.last_error = None;

            (entry.config.owner_user_id, entry.config.clone())
        };

        if let Some(owner) = owner {
            self.persist_health(owner, &snapshot).await;
        }
    }

    async fn persist_health(&self, owner_user_id: u64, config: &NodeConfig) {
        let mut storage = self.storage.lock().await;
        if let Some(mut record) = storage.get_node_record(owner_user_id) {
            record.retry_count = config.retry_count;
            record.is_active = config.is_active;
            record.last_error = config.last_error.clone();
            if let Err(e) = storage.save_node_record(&record).await {
                warn!("No se pudo persistir la salud del nodo {}: {e:?}", config.identifier);
            }
        }
    }

    pub fn get_link(&self, node_id: &str) -> Option<Arc<NodeLink>> {
        self.nodes.get(node_id).map(|entry| Arc::clone(&entry.link))
    }

    pub fn default_link(&self) -> Option<Arc<NodeLink>> {
        self.get_link("default")
    }

    #[allow(dead_code)]
    pub fn node_config(&self, node_id: &str) -> Option<NodeConfig> {
        self.nodes.get(node_id).map(|entry| entry.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProbe {
        result: parking_lot::Mutex<Option<NodeError>>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                result: parking_lot::Mutex::new(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: NodeError) -> Arc<Self> {
            Arc::new(Self {
                result: parking_lot::Mutex::new(Some(err)),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NodeProbe for FakeProbe {
        async fn probe(
            &self,
            _host: &str,
            _port: u16,
            _password: &str,
            _secure: bool,
        ) -> Result<(), NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result.lock().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    struct FakeIndex {
        bound: Option<(GuildId, String)>,
    }

    impl SessionIndex for FakeIndex {
        fn node_for_guild(&self, guild_id: GuildId) -> Option<String> {
            self.bound
                .as_ref()
                .filter(|(g, _)| *g == guild_id)
                .map(|(_, n)| n.clone())
        }

        fn is_node_in_use(&self, node_id: &str) -> bool {
            self.bound.as_ref().map(|(_, n)| n == node_id).unwrap_or(false)
        }
    }

    async fn registry_with(probe: Arc<dyn NodeProbe>) -> (Arc<NodeRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(tokio::sync::Mutex::new(
            JsonStorage::new(dir.path().to_path_buf()).await.unwrap(),
        ));
        let (tx, _rx) = flume::unbounded();
        let registry = NodeRegistry::new(Arc::new(Config::default()), storage, probe, tx);
        (registry, dir)
    }

    #[tokio::test]
    async fn test_invalid_host_rejected_before_probe() {
        let probe = FakeProbe::ok();
        let (registry, _dir) = registry_with(probe.clone() as Arc<dyn NodeProbe>).await;

        let result = registry
            .register_private_node(1, "bad host!", 2333, "pw", false)
            .await;

        assert!(matches!(result, Err(NodeError::InvalidHost)));
        // La prueba de conectividad nunca debe haberse intentado
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_timeout_leaves_no_state() {
        let probe = FakeProbe::failing(NodeError::ConnectionTimeout);
        let (registry, _dir) = registry_with(probe as Arc<dyn NodeProbe>).await;

        let result = registry
            .register_private_node(1, "audio.example.com", 2333, "pw", false)
            .await;

        match result {
            Err(NodeError::ConnectionTimeout) => {}
            other => panic!("se esperaba timeout, se obtuvo {other:?}"),
        }
        assert!(registry.node_config(&private_node_id(1)).is_none());
        assert!(registry.storage.lock().await.get_node_record(1).is_none());
    }

    #[tokio::test]
    async fn test_second_node_for_same_owner_rejected() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;

        registry
            .register_private_node(1, "audio.example.com", 2333, "pw", false)
            .await
            .unwrap();

        let result = registry
            .register_private_node(1, "otro.example.com", 2334, "pw", false)
            .await;

        assert!(matches!(result, Err(NodeError::DuplicateOwner)));
        // El nodo original sigue intacto
        let config = registry.node_config(&private_node_id(1)).unwrap();
        assert_eq!(config.host, "audio.example.com");
    }

    #[tokio::test]
    async fn test_retry_count_escalates_to_disable() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;
        registry
            .register_private_node(1, "audio.example.com", 2333, "pw", false)
            .await
            .unwrap();
        let id = private_node_id(1);

        for expected in 1..=4u32 {
            registry.report_node_failure(&id, "sin respuesta").await;
            let config = registry.node_config(&id).unwrap();
            assert_eq!(config.retry_count, expected);
            assert!(config.is_active);
        }

        // La quinta falla cruza el umbral con auto_fallback activo
        registry.report_node_failure(&id, "sin respuesta").await;
        let config = registry.node_config(&id).unwrap();
        assert_eq!(config.retry_count, 5);
        assert!(!config.is_active);
        assert_eq!(config.last_error.as_deref(), Some("sin respuesta"));
    }

    #[tokio::test]
    async fn test_recovery_resets_retry_count() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;
        registry
            .register_private_node(1, "audio.example.com", 2333, "pw", false)
            .await
            .unwrap();
        let id = private_node_id(1);

        registry.report_node_failure(&id, "sin respuesta").await;
        registry.report_node_failure(&id, "sin respuesta").await;
        registry.report_node_recovered(&id).await;

        let config = registry.node_config(&id).unwrap();
        assert_eq!(config.retry_count, 0);
        assert!(config.last_error.is_none());
    }

    #[tokio::test]
    async fn test_shared_nodes_ignore_failure_reports() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;
        registry.init_default_node().await;

        for _ in 0..10 {
            registry.report_node_failure("default", "sin respuesta").await;
        }

        let config = registry.node_config("default").unwrap();
        assert_eq!(config.retry_count, 0);
        assert!(config.is_active);
    }

    #[tokio::test]
    async fn test_unregister_bound_node_is_refused() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;
        registry
            .register_private_node(1, "audio.example.com", 2333, "pw", false)
            .await
            .unwrap();

        registry.set_session_index(Arc::new(FakeIndex {
            bound: Some((GuildId::new(9), private_node_id(1))),
        }));

        let result = registry.unregister_private_node(1).await;
        assert!(matches!(result, Err(NodeError::NodeInUse)));
        // El nodo sigue registrado
        assert!(registry.node_config(&private_node_id(1)).is_some());
    }

    #[tokio::test]
    async fn test_sticky_binding_wins_over_private_node() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;
        let guild = GuildId::new(9);

        registry.set_session_index(Arc::new(FakeIndex {
            bound: Some((guild, "default".to_string())),
        }));

        // Aunque el usuario tenga nodo privado, la sesión existente manda
        assert_eq!(
            registry.select_node_for_session(1, guild),
            Some("default".to_string())
        );
    }

    #[tokio::test]
    async fn test_disconnected_private_node_falls_back_to_pool() {
        let (registry, _dir) = registry_with(FakeProbe::ok() as Arc<dyn NodeProbe>).await;
        registry
            .register_private_node(1, "audio.example.com", 2333, "pw", false)
            .await
            .unwrap();

        // El link nunca llegó a conectarse, así que no se ofrece
        assert_eq!(registry.select_node_for_session(1, GuildId::new(9)), None);
    }
}
