//! Container/service port resolution and the port-derived environment.
//!
//! Each resolved value comes from an ordered fallback chain evaluated first-match-wins;
//! when every link misses, the configured default port is used.

use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use keel_core::{ExposedPort, PortSpec};
use tracing::debug;

use crate::config::CompilerConfig;

type Fallback = fn(&PortSpec) -> Option<i32>;

fn explicit_target_port(p: &PortSpec) -> Option<i32> {
    p.target_port
}

fn explicit_port(p: &PortSpec) -> Option<i32> {
    p.port
}

/// Container side: target port, then port.
pub const TARGET_PORT_CHAIN: &[Fallback] = &[explicit_target_port, explicit_port];
/// Service side: port, then target port.
pub const SERVICE_PORT_CHAIN: &[Fallback] = &[explicit_port, explicit_target_port];

/// Evaluate a chain, falling back to `default`.
pub fn first_match(chain: &[Fallback], spec: &PortSpec, default: i32) -> i32 {
    chain.iter().find_map(|f| f(spec)).unwrap_or(default)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPorts {
    pub container_ports: Vec<ContainerPort>,
    pub service_ports: Vec<ServicePort>,
}

impl ResolvedPorts {
    /// The first service port; what ingress routes to.
    pub fn public_service_port(&self) -> Option<i32> {
        self.service_ports.first().map(|p| p.port)
    }

    pub fn has_open_port(&self) -> bool {
        !self.container_ports.is_empty() && !self.service_ports.is_empty()
    }

    /// `port`/`PORT` when there is exactly one container port, and always `PORT_<process>`.
    pub fn env_vars(&self, process: &str) -> Vec<EnvVar> {
        let mut out = Vec::with_capacity(3);
        if let [only] = self.container_ports.as_slice() {
            let v = only.container_port.to_string();
            out.push(env("port", &v));
            out.push(env("PORT", &v));
        }
        let joined = self.container_ports.iter().map(|p| p.container_port.to_string()).collect::<Vec<_>>().join(",");
        out.push(env(&format!("PORT_{}", process), &joined));
        out
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

/// Entries to resolve when a process configures no ports: one per exposed image port,
/// or a single all-default entry when the image exposes nothing.
fn synthesize(exposed: &[ExposedPort]) -> Vec<PortSpec> {
    if exposed.is_empty() {
        return vec![PortSpec { protocol: "TCP".to_string(), ..Default::default() }];
    }
    exposed
        .iter()
        .map(|e| PortSpec { name: None, protocol: e.protocol.to_uppercase(), port: Some(e.port), target_port: Some(e.port) })
        .collect()
}

/// Resolve ports for one process.
///
/// `explicit` is the process's own port list; `None` means "not configured" and falls
/// back to the image, while an explicit empty list resolves to no ports at all.
pub fn resolve_ports(explicit: Option<&[PortSpec]>, exposed: &[ExposedPort], cfg: &CompilerConfig) -> ResolvedPorts {
    let entries = match explicit {
        Some(list) => list.to_vec(),
        None => synthesize(exposed),
    };
    let mut out = ResolvedPorts::default();
    for (i, spec) in entries.iter().enumerate() {
        let name = spec.name.clone().unwrap_or_else(|| format!("{}-{}", cfg.default_port_name, i + 1));
        let target = first_match(TARGET_PORT_CHAIN, spec, cfg.default_port);
        let port = first_match(SERVICE_PORT_CHAIN, spec, cfg.default_port);
        debug!(name = %name, port, target, protocol = %spec.protocol, "resolved port");
        out.container_ports.push(ContainerPort {
            name: Some(name.clone()),
            container_port: target,
            protocol: Some(spec.protocol.clone()),
            ..Default::default()
        });
        out.service_ports.push(ServicePort {
            name: Some(name),
            port,
            target_port: Some(IntOrString::Int(target)),
            protocol: Some(spec.protocol.clone()),
            ..Default::default()
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(port: Option<i32>, target: Option<i32>) -> PortSpec {
        PortSpec { name: None, protocol: "TCP".into(), port, target_port: target }
    }

    #[test]
    fn chains_prefer_their_own_side() {
        let both = spec(Some(80), Some(9000));
        assert_eq!(first_match(TARGET_PORT_CHAIN, &both, 8080), 9000);
        assert_eq!(first_match(SERVICE_PORT_CHAIN, &both, 8080), 80);

        let only_port = spec(Some(80), None);
        assert_eq!(first_match(TARGET_PORT_CHAIN, &only_port, 8080), 80);

        let only_target = spec(None, Some(9000));
        assert_eq!(first_match(SERVICE_PORT_CHAIN, &only_target, 8080), 9000);

        assert_eq!(first_match(SERVICE_PORT_CHAIN, &spec(None, None), 8080), 8080);
    }

    #[test]
    fn exposed_ports_are_synthesized_and_uppercased() {
        let cfg = CompilerConfig::default();
        let exposed = vec![ExposedPort { port: 8080, protocol: "tcp".into() }, ExposedPort { port: 9090, protocol: "udp".into() }];
        let r = resolve_ports(None, &exposed, &cfg);
        assert_eq!(r.container_ports.len(), 2);
        assert_eq!(r.container_ports[1].protocol.as_deref(), Some("UDP"));
        assert_eq!(r.container_ports[0].name.as_deref(), Some("http-default-1"));
        assert_eq!(r.service_ports[1].name.as_deref(), Some("http-default-2"));
        assert_eq!(r.public_service_port(), Some(8080));
    }

    #[test]
    fn nothing_exposed_yields_default_entry() {
        let cfg = CompilerConfig::default();
        let r = resolve_ports(None, &[], &cfg);
        assert_eq!(r.container_ports[0].container_port, 8080);
        assert_eq!(r.service_ports[0].target_port, Some(IntOrString::Int(8080)));
        assert!(r.has_open_port());
    }

    #[test]
    fn explicit_empty_list_means_no_ports() {
        let cfg = CompilerConfig::default();
        let exposed = vec![ExposedPort { port: 8080, protocol: "TCP".into() }];
        let r = resolve_ports(Some(&[][..]), &exposed, &cfg);
        assert!(!r.has_open_port());
        assert_eq!(r.public_service_port(), None);
    }

    #[test]
    fn explicit_names_win_and_defaults_use_position() {
        let cfg = CompilerConfig::default();
        let ports = vec![
            PortSpec { name: Some("metrics".into()), protocol: "TCP".into(), port: Some(9100), target_port: None },
            spec(Some(80), Some(8000)),
        ];
        let r = resolve_ports(Some(ports.as_slice()), &[], &cfg);
        assert_eq!(r.container_ports[0].name.as_deref(), Some("metrics"));
        assert_eq!(r.container_ports[1].name.as_deref(), Some("http-default-2"));
        assert_eq!(r.container_ports[1].container_port, 8000);
        assert_eq!(r.service_ports[1].port, 80);
    }

    #[test]
    fn env_vars_follow_port_count() {
        let cfg = CompilerConfig::default();
        let one = resolve_ports(None, &[ExposedPort { port: 5000, protocol: "TCP".into() }], &cfg);
        let names: Vec<_> = one.env_vars("web").into_iter().map(|e| (e.name, e.value.unwrap_or_default())).collect();
        let expected: Vec<(String, String)> = [("port", "5000"), ("PORT", "5000"), ("PORT_web", "5000")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(names, expected);

        let two = resolve_ports(Some(&[spec(Some(1), None), spec(Some(2), None)][..]), &[], &cfg);
        let vars = two.env_vars("api");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "PORT_api");
        assert_eq!(vars[0].value.as_deref(), Some("1,2"));

        let none = ResolvedPorts::default().env_vars("worker");
        assert_eq!(none[0].name, "PORT_worker");
        assert_eq!(none[0].value.as_deref(), Some(""));
    }
}
