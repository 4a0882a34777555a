//! Declarative inputs to the compiler.
//!
//! These types deserialize from the YAML/JSON an operator writes. Shapes that have a
//! Kubernetes equivalent (probes, env vars, volumes, security contexts, resources) reuse
//! the `k8s-openapi` types so they pass through to the value tree unchanged.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{EnvVar, Probe, ResourceRequirements, SecurityContext, Volume, VolumeMount};
use serde::{Deserialize, Serialize};

/// Ordinal identifying one immutable image + process-set revision of an application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct DeploymentVersion(pub u32);

impl fmt::Display for DeploymentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered oldest first; during a canary the first entry is the old version.
    #[serde(default)]
    pub deployments: Vec<DeploymentSpec>,
    /// Environment shared by every process of every version.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanarySpec>,
    #[serde(default)]
    pub ingress: IngressSpec,
    #[serde(default)]
    pub labels: Vec<MetadataRule>,
    #[serde(default)]
    pub annotations: Vec<MetadataRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub image: String,
    pub version: DeploymentVersion,
    /// Raw `name: command` process file shipped with the image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procfile: Option<String>,
    #[serde(default)]
    pub processes: Vec<ProcessSpec>,
    /// Ports declared by the image; used when a process configures none.
    #[serde(default)]
    pub exposed_ports: Vec<ExposedPort>,
    #[serde(default)]
    pub routing_weight: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    pub name: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<u32>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// `None` infers ports from the image; `Some(vec![])` means no ports at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<HooksSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    pub port: i32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HooksSpec {
    #[serde(default)]
    pub restart: RestartHooks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestartHooks {
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Append `<app>.<service endpoint>.<base domain>` to the plain-HTTP list.
    #[serde(default)]
    pub generate_default_cname: bool,
    #[serde(default)]
    pub cnames: Vec<CustomDomain>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomain {
    pub name: String,
    #[serde(default)]
    pub secure: bool,
    /// Pre-existing TLS secret; when set the certificate is operator-managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CanarySpec {
    pub steps: u32,
    pub step_weight: u32,
    pub step_interval_seconds: u64,
}

/// Target environment a compile is run against (formerly "pool"/"framework").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub ingress_controller: IngressControllerSpec,
    /// Number of applications the environment admits; enforced by the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_quota_limit: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
    #[serde(default)]
    pub ingress_type: IngressControllerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_issuer: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IngressControllerType {
    #[default]
    Traefik,
    Nginx,
    Istio,
}

impl IngressControllerType {
    /// Name of the template set rendered for this controller.
    pub fn as_str(&self) -> &'static str {
        match self {
            IngressControllerType::Traefik => "traefik",
            IngressControllerType::Nginx => "nginx",
            IngressControllerType::Istio => "istio",
        }
    }
}

/// Artifact kinds a metadata rule may target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Deployment,
    Service,
    Pod,
}

/// `apiVersion`/`kind` pair as written in a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
}

impl TargetRef {
    /// Resolve to a supported kind; anything else is not recognized.
    pub fn kind(&self) -> Option<TargetKind> {
        match (self.api_version.as_str(), self.kind.as_str()) {
            ("apps/v1", "Deployment") => Some(TargetKind::Deployment),
            ("v1", "Service") => Some(TargetKind::Service),
            ("v1", "Pod") => Some(TargetKind::Pod),
            _ => None,
        }
    }
}

/// Label or annotation rule scoped by target kind, version and process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRule {
    pub target: TargetRef,
    /// `0` matches every version.
    #[serde(default)]
    pub deployment_version: u32,
    /// Empty matches every process.
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub apply: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_spec_from_yaml() {
        let y = r#"
name: shop
deployments:
  - image: registry/shop:1
    version: 1
    routingWeight: 100
    procfile: "web: gunicorn app:app"
    exposedPorts:
      - port: 8080
ingress:
  cnames:
    - name: shop.example.com
      secure: true
labels:
  - target: { apiVersion: apps/v1, kind: Deployment }
    apply: { team: payments }
"#;
        let app: ApplicationSpec = serde_yaml::from_str(y).unwrap();
        assert_eq!(app.deployments[0].version, DeploymentVersion(1));
        assert_eq!(app.deployments[0].exposed_ports[0].protocol, "TCP");
        assert!(app.ingress.cnames[0].secure);
        assert_eq!(app.labels[0].target.kind(), Some(TargetKind::Deployment));
        assert_eq!(app.labels[0].deployment_version, 0);
    }

    #[test]
    fn unknown_targets_are_not_recognized() {
        let t = TargetRef { api_version: "v1".into(), kind: "Deployment".into() };
        assert_eq!(t.kind(), None);
        let t = TargetRef { api_version: "v1".into(), kind: "Service".into() };
        assert_eq!(t.kind(), Some(TargetKind::Service));
    }

    #[test]
    fn environment_defaults_to_traefik() {
        let env: EnvironmentSpec = serde_json::from_value(serde_json::json!({ "name": "prod" })).unwrap();
        assert_eq!(env.ingress_controller.ingress_type, IngressControllerType::Traefik);
        assert!(env.ingress_controller.cluster_issuer.is_none());
    }
}
