use serenity::http::HttpError;
use thiserror::Error;

/// Errores de registro y operación de nodos de audio.
///
/// Las fallas de conectividad se devuelven de forma síncrona a quien
/// registra el nodo; nunca se reintentan internamente.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Host inválido: solo se permiten letras, números, puntos y guiones")]
    InvalidHost,

    #[error("Ya tienes un nodo privado registrado")]
    DuplicateOwner,

    #[error("Ya existe un nodo con el identificador `{0}`")]
    DuplicateIdentifier(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("{0}")]
    Connectivity(String),

    #[error("El nodo está en uso por una sesión activa y no puede eliminarse")]
    NodeInUse,

    #[error("No tienes ningún nodo privado registrado")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Clasificación de una falla al editar un mensaje del panel.
///
/// Decide qué hace el presentador en el siguiente tick: recrear el mensaje,
/// esperar el backoff de rate limit, o simplemente reintentar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditFailure {
    /// Mensaje borrado, sin acceso al canal, o autoría ajena. Se descarta la
    /// referencia y el siguiente tick crea un mensaje nuevo.
    Gone,
    /// Rate limit del API. No es un error para el caller: se convierte en un
    /// backoff programado.
    RateLimited,
    /// Cualquier otra cosa. Se conserva la referencia y se reintenta.
    Other,
}

// Códigos JSON del API de Discord que invalidan la referencia al mensaje.
const UNKNOWN_MESSAGE: isize = 10008;
const UNKNOWN_CHANNEL: isize = 10003;
const MISSING_ACCESS: isize = 50001;
const MISSING_PERMISSIONS: isize = 50013;
const CANNOT_EDIT_OTHER_AUTHOR: isize = 50005;

/// Clasifica un error de serenity según lo que debe hacer el presentador.
pub fn classify_edit_error(err: &serenity::Error) -> EditFailure {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            if response.status_code.as_u16() == 429 {
                return EditFailure::RateLimited;
            }
            match response.error.code {
                UNKNOWN_MESSAGE | UNKNOWN_CHANNEL | MISSING_ACCESS | MISSING_PERMISSIONS
                | CANNOT_EDIT_OTHER_AUTHOR => EditFailure::Gone,
                _ => EditFailure::Other,
            }
        }
        serenity::Error::Http(HttpError::RateLimitI64F64 | HttpError::RateLimitUtf8) => {
            EditFailure::RateLimited
        }
        serenity::Error::Model(_) => EditFailure::Gone,
        _ => EditFailure::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_failure_variants_are_distinct() {
        assert_ne!(EditFailure::Gone, EditFailure::RateLimited);
        assert_ne!(EditFailure::RateLimited, EditFailure::Other);
    }

    #[test]
    fn test_node_error_messages() {
        assert_eq!(NodeError::ConnectionTimeout.to_string(), "Connection timeout");
        assert_eq!(
            NodeError::Connectivity("connection refused".into()).to_string(),
            "connection refused"
        );
    }
}
