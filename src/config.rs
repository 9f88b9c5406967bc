use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Nodos de audio por defecto (pool compartido)
    pub default_node_host: String,
    pub default_node_port: u16,
    pub default_node_password: String,
    pub default_node_secure: bool,

    // Rendimiento
    pub worker_threads: usize,
    pub max_queue_size: usize,

    // Paths
    pub data_dir: PathBuf,

    // Tiempos de nodos (milisegundos)
    pub node_connect_timeout_ms: u64,
    pub node_connect_poll_ms: u64,
    pub node_health_interval_ms: u64,
    pub node_health_lifetime_ms: u64,
    pub node_max_retries: u32,

    // Tiempos de presentación y sesión (milisegundos)
    pub activity_check_interval_ms: u64,
    pub activity_response_timeout_ms: u64,
    pub now_playing_interval_ms: u64,
    pub now_playing_min_gap_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub cleanup_delay_ms: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Nodo por defecto
            default_node_host: env_or("NODE_HOST", "localhost"),
            default_node_port: env_or("NODE_PORT", "2333").parse()?,
            default_node_password: env_or("NODE_PASSWORD", "youshallnotpass"),
            default_node_secure: env_or("NODE_SECURE", "false").parse()?,

            // Rendimiento
            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },
            max_queue_size: env_or("MAX_QUEUE_SIZE", "1000").parse()?,

            // Paths
            data_dir: env_or("DATA_DIR", "/app/data").into(),

            // Tiempos de nodos
            node_connect_timeout_ms: env_or("NODE_CONNECT_TIMEOUT_MS", "10000").parse()?,
            node_connect_poll_ms: env_or("NODE_CONNECT_POLL_MS", "100").parse()?,
            node_health_interval_ms: env_or("NODE_HEALTH_INTERVAL_MS", "5000").parse()?,
            node_health_lifetime_ms: env_or("NODE_HEALTH_LIFETIME_MS", "60000").parse()?,
            node_max_retries: env_or("NODE_MAX_RETRIES", "5").parse()?,

            // Tiempos de presentación y sesión
            activity_check_interval_ms: env_or("ACTIVITY_CHECK_INTERVAL_MS", "21600000").parse()?,
            activity_response_timeout_ms: env_or("ACTIVITY_RESPONSE_TIMEOUT_MS", "300000")
                .parse()?,
            now_playing_interval_ms: env_or("NOW_PLAYING_INTERVAL_MS", "15000").parse()?,
            now_playing_min_gap_ms: env_or("NOW_PLAYING_MIN_GAP_MS", "5000").parse()?,
            rate_limit_backoff_ms: env_or("RATE_LIMIT_BACKOFF_MS", "30000").parse()?,
            cleanup_delay_ms: env_or("CLEANUP_DELAY_MS", "300000").parse()?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Valida los valores de configuración antes de arrancar el bot.
    pub fn validate(&self) -> Result<()> {
        if self.default_node_host.is_empty() {
            anyhow::bail!("NODE_HOST no puede estar vacío");
        }

        if self.node_max_retries == 0 {
            anyhow::bail!("NODE_MAX_RETRIES debe ser mayor que 0");
        }

        if self.node_connect_poll_ms == 0
            || self.node_connect_poll_ms > self.node_connect_timeout_ms
        {
            anyhow::bail!(
                "NODE_CONNECT_POLL_MS debe estar entre 1 y el timeout de conexión ({}ms)",
                self.node_connect_timeout_ms
            );
        }

        if self.now_playing_min_gap_ms > self.now_playing_interval_ms {
            anyhow::bail!(
                "NOW_PLAYING_MIN_GAP_MS ({}) no puede superar el intervalo regular ({})",
                self.now_playing_min_gap_ms,
                self.now_playing_interval_ms
            );
        }

        if self.activity_response_timeout_ms >= self.activity_check_interval_ms {
            anyhow::bail!("ACTIVITY_RESPONSE_TIMEOUT_MS debe ser menor que el intervalo de chequeo");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("MAX_QUEUE_SIZE debe ser mayor que 0");
        }

        Ok(())
    }

    /// Resumen seguro de la configuración para logging (sin tokens).
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Nodo por defecto: {}:{} (secure={})\n  \
            Tiempos: check {}h, respuesta {}m, cleanup {}m, panel {}s\n  \
            Límites: {} cola, {} reintentos de nodo",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_node_host,
            self.default_node_port,
            self.default_node_secure,
            self.activity_check_interval_ms / 3_600_000,
            self.activity_response_timeout_ms / 60_000,
            self.cleanup_delay_ms / 60_000,
            self.now_playing_interval_ms / 1000,
            self.max_queue_size,
            self.node_max_retries
        )
    }

    pub fn node_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.node_connect_timeout_ms)
    }

    pub fn node_connect_poll(&self) -> Duration {
        Duration::from_millis(self.node_connect_poll_ms)
    }

    pub fn activity_check_interval(&self) -> Duration {
        Duration::from_millis(self.activity_check_interval_ms)
    }

    pub fn activity_response_timeout(&self) -> Duration {
        Duration::from_millis(self.activity_response_timeout_ms)
    }

    pub fn now_playing_interval(&self) -> Duration {
        Duration::from_millis(self.now_playing_interval_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

/// Valores por defecto, alineados con los tiempos documentados del bot.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_node_host: "localhost".to_string(),
            default_node_port: 2333,
            default_node_password: "youshallnotpass".to_string(),
            default_node_secure: false,

            worker_threads: num_cpus::get(),
            max_queue_size: 1000,

            data_dir: "/app/data".into(),

            node_connect_timeout_ms: 10_000,
            node_connect_poll_ms: 100,
            node_health_interval_ms: 5_000,
            node_health_lifetime_ms: 60_000,
            node_max_retries: 5,

            activity_check_interval_ms: 21_600_000, // 6 horas
            activity_response_timeout_ms: 300_000,  // 5 minutos
            now_playing_interval_ms: 15_000,
            now_playing_min_gap_ms: 5_000,
            rate_limit_backoff_ms: 30_000,
            cleanup_delay_ms: 300_000, // 5 minutos
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = Config::default();
        config.discord_token = "token".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_gap_cannot_exceed_interval() {
        let mut config = Config::default();
        config.now_playing_min_gap_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_window_shorter_than_check_interval() {
        let mut config = Config::default();
        config.activity_response_timeout_ms = config.activity_check_interval_ms;
        assert!(config.validate().is_err());
    }
}
