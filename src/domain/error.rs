use thiserror::Error;

/// Errors raised inside the cache layer.
///
/// Drivers use these internally and degrade to a miss or a `false` result at
/// the [`CacheDriver`](crate::domain::cache::CacheDriver) boundary. Only the
/// factory and the configuration loader hand them to callers.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unsupported backend: {backend} - {message}")]
    Unsupported { backend: String, message: String },

    #[error("Connection error: {endpoint} - {message}")]
    Connection { endpoint: String, message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DomainError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn unsupported(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let error = DomainError::configuration("servers list is empty");
        assert_eq!(
            error.to_string(),
            "Configuration error: servers list is empty"
        );
    }

    #[test]
    fn test_connection_error() {
        let error = DomainError::connection("127.0.0.1:11211", "connection refused");
        assert_eq!(
            error.to_string(),
            "Connection error: 127.0.0.1:11211 - connection refused"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing marker");
        let error: DomainError = io.into();
        assert!(matches!(error, DomainError::Io(_)));
        assert_eq!(error.to_string(), "I/O error: missing marker");
    }
}
