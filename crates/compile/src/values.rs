//! The compiled value tree handed to the installer.
//!
//! Everything here serializes deterministically: ordered `Vec`s in compile order and
//! `BTreeMap`s for keyed data, so equal inputs give byte-identical output.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, Lifecycle, Probe, ResourceRequirements, SecurityContext, ServicePort, Volume, VolumeMount};
use keel_core::{DeploymentVersion, IngressControllerType};
use serde::{Deserialize, Serialize};

use crate::ingress::IngressEndpoints;
use crate::metadata::MetadataBucket;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Values {
    pub app: AppValues,
    pub ingress_controller: IngressControllerValues,
}

impl Values {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn deployment(&self, version: DeploymentVersion) -> Option<&DeploymentValues> {
        self.app.deployments.iter().find(|d| d.version == version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppValues {
    pub name: String,
    pub deployments: Vec<DeploymentValues>,
    pub env: Vec<EnvVar>,
    pub ingress: IngressEndpoints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentValues {
    pub image: String,
    pub version: DeploymentVersion,
    pub processes: Vec<ProcessValues>,
    pub routing_settings: RoutingSettings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl DeploymentValues {
    pub fn process(&self, name: &str) -> Option<&ProcessValues> {
        self.processes.iter().find(|p| p.name == name)
    }

    pub fn routable(&self) -> Option<&ProcessValues> {
        self.processes.iter().find(|p| p.routable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub weight: u32,
}

/// One fully-resolved process of one deployment version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessValues {
    pub name: String,
    pub cmd: Vec<String>,
    pub units: u32,
    pub routable: bool,
    pub container_ports: Vec<ContainerPort>,
    pub service_ports: Vec<ServicePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_service_port: Option<i32>,
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    pub deployment_metadata: MetadataBucket,
    pub service_metadata: MetadataBucket,
    pub pod_metadata: MetadataBucket,
}

impl ProcessValues {
    pub fn has_open_port(&self) -> bool {
        !self.container_ports.is_empty() && !self.service_ports.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
    #[serde(rename = "type")]
    pub ingress_type: IngressControllerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_issuer: Option<String>,
}
