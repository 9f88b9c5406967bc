use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError},
};
use tracing::debug;

use crate::error::NodeError;
use crate::player::link::CLIENT_NAME;

/// Prueba de conectividad contra un nodo candidato.
///
/// Seam para los tests del registro: en producción se usa [`WsProbe`].
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        password: &str,
        secure: bool,
    ) -> Result<(), NodeError>;
}

/// Prueba real: abre un WebSocket temporal contra el nodo y lo cierra.
///
/// El intento de conexión corre en una tarea aparte que reintenta mientras
/// este método sondea el resultado cada `poll` hasta agotar `timeout`. El
/// socket de prueba se tira siempre, con éxito o sin él.
pub struct WsProbe {
    pub timeout: Duration,
    pub poll: Duration,
}

impl WsProbe {
    pub fn new(timeout: Duration, poll: Duration) -> Self {
        Self { timeout, poll }
    }
}

#[async_trait]
impl NodeProbe for WsProbe {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        password: &str,
        secure: bool,
    ) -> Result<(), NodeError> {
        let scheme = if secure { "wss" } else { "ws" };
        let url = format!("{scheme}://{host}:{port}/v4/websocket");
        let password = password.to_string();

        let connected = Arc::new(AtomicBool::new(false));
        let fatal: Arc<parking_lot::Mutex<Option<NodeError>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let connected_flag = Arc::clone(&connected);
        let fatal_slot = Arc::clone(&fatal);
        let retry_step = self.poll;

        let attempt = tokio::spawn(async move {
            loop {
                let request = match url.clone().into_client_request() {
                    Ok(mut request) => {
                        let headers = request.headers_mut();
                        if let Ok(value) = HeaderValue::from_str(&password) {
                            headers.insert("Authorization", value);
                        }
                        headers.insert("User-Id", HeaderValue::from_static("0"));
                        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));
                        request
                    }
                    Err(e) => {
                        *fatal_slot.lock() = Some(NodeError::Connectivity(e.to_string()));
                        return;
                    }
                };

                match connect_async(request).await {
                    Ok((mut stream, _response)) => {
                        connected_flag.store(true, Ordering::SeqCst);
                        let _ = stream.close(None).await;
                        return;
                    }
                    // El nodo respondió pero rechazó el upgrade (clave mala,
                    // ruta inexistente): eso es un error definitivo, no un
                    // timeout.
                    Err(WsError::Http(response)) => {
                        *fatal_slot.lock() = Some(NodeError::Connectivity(format!(
                            "El nodo respondió HTTP {}",
                            response.status()
                        )));
                        return;
                    }
                    Err(e) => {
                        debug!("Intento de conexión al nodo falló: {e}");
                        tokio::time::sleep(retry_step).await;
                    }
                }
            }
        });

        let deadline = Instant::now() + self.timeout;
        let result = loop {
            if connected.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Some(err) = fatal.lock().take() {
                break Err(err);
            }
            if Instant::now() >= deadline {
                break Err(NodeError::ConnectionTimeout);
            }
            tokio::time::sleep(self.poll).await;
        };

        attempt.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_node_times_out() {
        // Nadie escucha en el puerto 1; el sondeo debe agotar su ventana y
        // devolver exactamente "Connection timeout".
        let probe = WsProbe::new(Duration::from_millis(200), Duration::from_millis(20));
        let result = probe.probe("127.0.0.1", 1, "pw", false).await;

        match result {
            Err(NodeError::ConnectionTimeout) => {}
            other => panic!("se esperaba timeout, se obtuvo {other:?}"),
        }
    }
}
