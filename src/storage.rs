use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    /// Modo 24/7: el bot permanece conectado aunque el canal quede vacío.
    pub always_on: bool,
    pub announcement_channel_id: Option<u64>,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            guild_id: 0,
            always_on: false,
            announcement_channel_id: None,
        }
    }
}

/// Registro persistido de un nodo privado de usuario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub user_id: u64,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    pub retry_count: u32,
    pub is_active: bool,
    pub auto_fallback: bool,
    pub last_error: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonStorage {
    data_dir: PathBuf,
    guilds_cache: HashMap<u64, GuildSettings>,
    nodes_cache: HashMap<u64, NodeRecord>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        // Crear directorios de datos si no existen
        fs::create_dir_all(&data_dir).await?;
        fs::create_dir_all(data_dir.join("servers")).await?;
        fs::create_dir_all(data_dir.join("nodes")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let mut storage = Self {
            data_dir,
            guilds_cache: HashMap::new(),
            nodes_cache: HashMap::new(),
        };

        storage.load_all_nodes().await?;

        Ok(storage)
    }

    /// Obtiene la configuración de un servidor, creándola si no existe.
    pub async fn get_guild_settings(&mut self, guild_id: u64) -> Result<GuildSettings> {
        if let Some(settings) = self.guilds_cache.get(&guild_id) {
            return Ok(settings.clone());
        }

        let path = self.guild_path(guild_id);
        match fs::read_to_string(&path).await {
            Ok(raw) => {
                let settings: GuildSettings = serde_json::from_str(&raw)?;
                self.guilds_cache.insert(guild_id, settings.clone());
                Ok(settings)
            }
            Err(_) => {
                let settings = GuildSettings {
                    guild_id,
                    ..GuildSettings::default()
                };
                self.save_guild_settings(&settings).await?;
                info!("📝 Configuración por defecto creada para guild {}", guild_id);
                Ok(settings)
            }
        }
    }

    /// Actualiza la configuración de un servidor.
    pub async fn save_guild_settings(&mut self, settings: &GuildSettings) -> Result<()> {
        self.guilds_cache.insert(settings.guild_id, settings.clone());

        let path = self.guild_path(settings.guild_id);
        let raw = serde_json::to_string_pretty(settings)?;
        fs::write(&path, raw).await?;

        Ok(())
    }

    /// Activa o desactiva el modo 24/7 de un servidor.
    pub async fn set_always_on(&mut self, guild_id: u64, enabled: bool) -> Result<()> {
        let mut settings = self.get_guild_settings(guild_id).await?;
        settings.always_on = enabled;
        self.save_guild_settings(&settings).await?;

        info!("💾 Modo 24/7 {} para guild {}", if enabled { "activado" } else { "desactivado" }, guild_id);
        Ok(())
    }

    /// Obtiene el registro del nodo privado de un usuario.
    pub fn get_node_record(&self, user_id: u64) -> Option<NodeRecord> {
        self.nodes_cache.get(&user_id).cloned()
    }

    /// Todos los registros de nodos privados conocidos.
    pub fn all_node_records(&self) -> Vec<NodeRecord> {
        self.nodes_cache.values().cloned().collect()
    }

    /// Persiste el registro de un nodo privado.
    pub async fn save_node_record(&mut self, record: &NodeRecord) -> Result<()> {
        self.nodes_cache.insert(record.user_id, record.clone());

        let path = self.node_path(record.user_id);
        let raw = serde_json::to_string_pretty(record)?;
        fs::write(&path, raw).await?;

        info!("💾 Nodo privado guardado para usuario {}", record.user_id);
        Ok(())
    }

    /// Elimina el registro del nodo privado de un usuario.
    pub async fn delete_node_record(&mut self, user_id: u64) -> Result<()> {
        self.nodes_cache.remove(&user_id);

        let path = self.node_path(user_id);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        info!("🗑️ Nodo privado eliminado para usuario {}", user_id);
        Ok(())
    }

    /// Carga todos los registros de nodos privados al arrancar.
    async fn load_all_nodes(&mut self) -> Result<()> {
        let nodes_dir = self.data_dir.join("nodes");
        let mut entries = fs::read_dir(&nodes_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<NodeRecord>(&raw) {
                    Ok(record) => {
                        self.nodes_cache.insert(record.user_id, record);
                    }
                    Err(e) => {
                        warn!("Registro de nodo corrupto en {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("No se pudo leer {}: {}", path.display(), e);
                }
            }
        }

        if !self.nodes_cache.is_empty() {
            info!("📦 {} nodos privados cargados", self.nodes_cache.len());
        }

        Ok(())
    }

    fn guild_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join("servers").join(format!("{guild_id}.json"))
    }

    fn node_path(&self, user_id: u64) -> PathBuf {
        self.data_dir.join("nodes").join(format!("{user_id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_node_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        let record = NodeRecord {
            user_id: 42,
            host: "audio.example.com".to_string(),
            port: 2333,
            password: "secret".to_string(),
            secure: true,
            retry_count: 0,
            is_active: true,
            auto_fallback: true,
            last_error: None,
            added_at: Utc::now(),
        };

        storage.save_node_record(&record).await.unwrap();
        assert_eq!(storage.get_node_record(42).unwrap().host, "audio.example.com");

        // Una instancia nueva debe recargar el registro desde disco
        let reloaded = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.get_node_record(42).unwrap().port, 2333);

        let mut storage = reloaded;
        storage.delete_node_record(42).await.unwrap();
        assert!(storage.get_node_record(42).is_none());
    }

    #[tokio::test]
    async fn test_always_on_flag_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        assert!(!storage.get_guild_settings(7).await.unwrap().always_on);

        storage.set_always_on(7, true).await.unwrap();
        assert!(storage.get_guild_settings(7).await.unwrap().always_on);
    }
}
