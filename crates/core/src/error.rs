//! Compile error taxonomy.

use thiserror::Error;

/// Failures raised while compiling an application into a package.
///
/// Every variant is a pure function of the inputs; nothing has been handed to an
/// installer by the time one of these is returned.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The process definition had no well-formed entries.
    #[error("process definition is empty: no `name: command` entries found")]
    EmptyDefinition,
    /// A label/annotation key was rejected before merge.
    #[error("malformed metadata key {key:?}: keys must be non-empty and must not begin with '_'")]
    MalformedMetadataKey { key: String },
    /// A routable process resolved no container or service ports.
    #[error("routable process {process:?} has no container or service ports")]
    PortsNotFound { process: String },
    /// A secure domain was requested but the environment has no certificate issuer.
    #[error("domain {domain:?} is secure but the environment has no cluster issuer configured")]
    MissingClusterIssuer { domain: String },
    /// The template reader has no template set under this name.
    #[error("template set {name:?} not found")]
    TemplatesNotFound { name: String },
    /// The template reader failed for a reason other than absence.
    #[error("reading template set {name:?} failed: {error}")]
    Templates { name: String, error: anyhow::Error },
    /// Structural problems with the application spec.
    #[error("invalid application spec: {0}")]
    InvalidSpec(String),
    /// The installer rejected the compiled package.
    #[error("install failed: {0}")]
    Install(anyhow::Error),
}

impl CompileError {
    /// Short stable label, used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::EmptyDefinition => "empty_definition",
            CompileError::MalformedMetadataKey { .. } => "malformed_metadata_key",
            CompileError::PortsNotFound { .. } => "ports_not_found",
            CompileError::MissingClusterIssuer { .. } => "missing_cluster_issuer",
            CompileError::TemplatesNotFound { .. } => "templates_not_found",
            CompileError::Templates { .. } => "templates",
            CompileError::InvalidSpec(_) => "invalid_spec",
            CompileError::Install(_) => "install",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings_name_the_offender() {
        let e = CompileError::MissingClusterIssuer { domain: "shop.example.com".into() };
        assert!(e.to_string().contains("shop.example.com"));
        assert_eq!(e.kind(), "missing_cluster_issuer");

        let e = CompileError::PortsNotFound { process: "web".into() };
        assert!(e.to_string().contains("\"web\""), "e={}", e);
    }
}
