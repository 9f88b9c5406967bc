use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::nodes::NodeRegistry;

/// Chequeo de salud de un nodo recién registrado.
///
/// Sondea cada 5 segundos durante el primer minuto de vida del nodo. La
/// ventana acotada evita reaccionar a un parpadeo puntual: solo una racha de
/// fallas durante la estabilización inicial llega a desactivar el nodo.
/// Pasado el minuto se asume estabilidad y la tarea muere sola.
pub fn spawn_health_poll(registry: Arc<NodeRegistry>, node_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_millis(registry.config().node_health_interval_ms);
        let lifetime = Duration::from_millis(registry.config().node_health_lifetime_ms);
        let started = Instant::now();

        let mut ticker = tokio::time::interval(interval);
        // El primer tick de interval() es inmediato; consumirlo para que el
        // primer chequeo real ocurra recién al cumplirse el intervalo.
        ticker.tick().await;

        while started.elapsed() < lifetime {
            ticker.tick().await;

            let link = match registry.get_link(&node_id) {
                Some(link) => link,
                // El nodo fue eliminado del registro
                None => break,
            };

            if link.is_connected() {
                registry.report_node_recovered(&node_id).await;
            } else {
                registry
                    .report_node_failure(&node_id, "El nodo no respondió al chequeo de salud")
                    .await;
            }
        }

        debug!("Chequeo de salud de {} finalizado", node_id);
    })
}
