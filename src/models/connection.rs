use serde::{Deserialize, Serialize};

/// Authorization mode of a configured backend connection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Anyone may query the connection, no signature required.
    Public,
    /// Requests must carry a valid signature from an allowed client.
    #[default]
    #[serde(other)]
    Private,
}

/// A named backend database target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(alias = "connectionstring")]
    pub connection_string: String,
}

impl ConnectionProfile {
    pub fn is_public(&self) -> bool {
        self.auth == AuthMode::Public
    }
}

/// A client identity holding a shared secret and the connections it may query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPrincipal {
    #[serde(alias = "clientid")]
    pub client_id: String,
    #[serde(alias = "clientsecret")]
    pub client_secret: String,
    #[serde(default)]
    pub connections: Vec<String>,
}

impl ClientPrincipal {
    pub fn can_access(&self, connection_name: &str) -> bool {
        self.connections.iter().any(|c| c == connection_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_defaults_to_private() {
        let profile: ConnectionProfile = serde_json::from_str(
            r#"{"name": "default", "connectionString": "postgres://localhost/db"}"#,
        )
        .unwrap();
        assert_eq!(profile.auth, AuthMode::Private);
        assert!(!profile.is_public());
    }

    #[test]
    fn test_unknown_auth_mode_is_private() {
        let profile: ConnectionProfile = serde_json::from_str(
            r#"{"name": "x", "auth": "open", "connectionString": "postgres://localhost/db"}"#,
        )
        .unwrap();
        assert_eq!(profile.auth, AuthMode::Private);
    }

    #[test]
    fn test_public_connection() {
        let profile: ConnectionProfile = serde_json::from_str(
            r#"{"name": "x", "auth": "public", "connectionString": "postgres://localhost/db"}"#,
        )
        .unwrap();
        assert!(profile.is_public());
    }

    #[test]
    fn test_principal_allow_list() {
        let principal = ClientPrincipal {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            connections: vec!["default".to_string(), "reporting".to_string()],
        };
        assert!(principal.can_access("reporting"));
        assert!(!principal.can_access("billing"));
    }
}
