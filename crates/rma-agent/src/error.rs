//! Error types for agent sessions and their collaborators.
//!
//! Collaborator errors (naming, connector, binding, config) carry string
//! payloads so they stay `Clone` and can be aggregated across teardown
//! steps.

use std::path::PathBuf;

use rma_core::IdentityError;
use thiserror::Error;

/// Naming-registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("name already bound: {0}")]
    AlreadyBound(String),

    #[error("name not bound: {0}")]
    NotBound(String),

    #[error("naming service unavailable at {address}: {reason}")]
    Unavailable { address: String, reason: String },

    #[error("naming protocol error: {0}")]
    Protocol(String),
}

/// Connector transport failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("failed to bind connector at {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("connector already started")]
    AlreadyStarted,

    #[error("failed to stop connector: {0}")]
    Stop(String),
}

/// Object-table failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("object name already bound: {0}")]
    AlreadyBound(String),

    #[error("object name not bound: {0}")]
    NotBound(String),
}

/// Configuration loading failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid host '{0}': expected an IP address")]
    InvalidHost(String),
}

/// The step of a registration or teardown that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStep {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("naming: {0}")]
    Naming(#[from] NamingError),

    #[error("connector: {0}")]
    Connector(#[from] ConnectorError),

    #[error("binding: {0}")]
    Binding(#[from] BindingError),
}

/// Errors surfaced by sessions and the endpoint registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// A live session or endpoint already exists for the identity.
    #[error("component already registered: {identity}")]
    AlreadyRegistered { identity: String },

    /// A register step failed; nothing from the attempt is left bound.
    #[error("registration of {identity} failed: {cause}")]
    RegistrationFailed {
        identity: String,
        #[source]
        cause: RegistrationStep,
    },

    /// The exposed root lacks the attributes an agent needs.
    #[error("incompatible management target: {0}")]
    IncompatibleTarget(IdentityError),

    /// Teardown finished but some steps failed.
    #[error("unregistration of {identity} completed with {} failed step(s): {}", .failures.len(), join(.failures))]
    UnregistrationIncomplete {
        identity: String,
        failures: Vec<RegistrationStep>,
    },

    /// The registry actor is gone.
    #[error("registry channel closed")]
    ChannelClosed,
}

fn join(failures: &[RegistrationStep]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_failed_display() {
        let err = AgentError::RegistrationFailed {
            identity: "ABC/Backup".to_string(),
            cause: NamingError::Unavailable {
                address: "127.0.0.1:3000".to_string(),
                reason: "connection refused".to_string(),
            }
            .into(),
        };
        assert_eq!(
            err.to_string(),
            "registration of ABC/Backup failed: naming: naming service unavailable at 127.0.0.1:3000: connection refused"
        );
    }

    #[test]
    fn test_unregistration_incomplete_lists_failures() {
        let err = AgentError::UnregistrationIncomplete {
            identity: "ABC/Backup".to_string(),
            failures: vec![
                ConnectorError::Stop("socket busy".to_string()).into(),
                BindingError::NotBound("rma:type=Agent".to_string()).into(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 failed step(s)"));
        assert!(text.contains("socket busy"));
        assert!(text.contains("rma:type=Agent"));
    }
}
