//! Application -> value tree compilation.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use keel_core::{ApplicationSpec, CompileError, CompileResult, DeploymentSpec, EnvironmentSpec, ProcessSpec, FULL_WEIGHT};
use keel_procfile::Procfile;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::config::CompilerConfig;
use crate::health::{post_start_lifecycle, resolve_probes};
use crate::ingress::resolve_endpoints;
use crate::metadata::{resolve_metadata, RuleContext};
use crate::ports::resolve_ports;
use crate::values::{AppValues, DeploymentValues, IngressControllerValues, ProcessValues, RoutingSettings, Values};

/// Compiles application specs against an environment. Holds no state besides its
/// defaults, so one instance can serve concurrent compiles.
#[derive(Debug, Clone, Default)]
pub struct DeploymentCompiler {
    config: CompilerConfig,
}

impl DeploymentCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `app` for `env` into a value tree.
    pub fn compile(&self, app: &ApplicationSpec, env: &EnvironmentSpec) -> CompileResult<Values> {
        let t0 = Instant::now();
        let res = self.compile_inner(app, env);
        match &res {
            Ok(values) => {
                histogram!("compile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("compile_ok", 1u64);
                info!(app = %app.name, environment = %env.name, deployments = values.app.deployments.len(), "compiled application");
            }
            Err(e) => {
                counter!("compile_err", 1u64);
                warn!(app = %app.name, environment = %env.name, kind = e.kind(), error = %e, "compile failed");
            }
        }
        res
    }

    fn compile_inner(&self, app: &ApplicationSpec, env: &EnvironmentSpec) -> CompileResult<Values> {
        validate(app)?;
        let ingress = resolve_endpoints(&app.name, &app.ingress, &env.ingress_controller, &self.config)?;
        let sole = app.deployments.len() == 1;
        let deployments = app
            .deployments
            .iter()
            .map(|dep| self.compile_deployment(app, dep, sole))
            .collect::<CompileResult<Vec<_>>>()?;
        let ic = &env.ingress_controller;
        Ok(Values {
            app: AppValues {
                name: app.name.clone(),
                deployments,
                env: app.env.clone(),
                ingress,
                service_account_name: app.service_account_name.clone(),
                image_pull_secrets: app.image_pull_secrets.clone(),
            },
            ingress_controller: IngressControllerValues {
                class_name: ic.class_name.clone(),
                service_endpoint: ic.service_endpoint.clone(),
                ingress_type: ic.ingress_type,
                cluster_issuer: ic.cluster_issuer.clone(),
            },
        })
    }

    fn compile_deployment(&self, app: &ApplicationSpec, dep: &DeploymentSpec, sole: bool) -> CompileResult<DeploymentValues> {
        let procfile = process_set(dep)?;
        let specs: BTreeMap<&str, &ProcessSpec> = dep.processes.iter().map(|p| (p.name.as_str(), p)).collect();
        debug!(version = %dep.version, routable = %procfile.routable_process, processes = procfile.processes.len(), "compiling deployment");
        let mut processes = Vec::with_capacity(procfile.processes.len());
        for (name, cmd) in &procfile.processes {
            let spec = specs.get(name.as_str()).copied();
            processes.push(self.compile_process(app, dep, name, cmd, spec, procfile.is_routable(name))?);
        }
        // A lone deployment that never set a weight takes all traffic.
        let weight = if sole && dep.routing_weight == 0 { FULL_WEIGHT } else { dep.routing_weight };
        Ok(DeploymentValues {
            image: dep.image.clone(),
            version: dep.version,
            processes,
            routing_settings: RoutingSettings { weight },
            labels: dep.labels.clone(),
        })
    }

    fn compile_process(
        &self,
        app: &ApplicationSpec,
        dep: &DeploymentSpec,
        name: &str,
        cmd: &[String],
        spec: Option<&ProcessSpec>,
        routable: bool,
    ) -> CompileResult<ProcessValues> {
        let units = spec.and_then(|s| s.units).unwrap_or(self.config.default_units);
        if units == 0 {
            return Err(CompileError::InvalidSpec(format!("process {:?} of version {} must run at least one unit", name, dep.version)));
        }
        let cmd = match spec {
            Some(s) if !s.cmd.is_empty() => s.cmd.clone(),
            _ => cmd.to_vec(),
        };

        let ports = resolve_ports(spec.and_then(|s| s.ports.as_deref()), &dep.exposed_ports, &self.config);
        if routable && !ports.has_open_port() {
            return Err(CompileError::PortsNotFound { process: name.to_string() });
        }

        let mut env = ports.env_vars(name);
        env.extend(app.env.iter().cloned());
        if let Some(s) = spec {
            env.extend(s.env.iter().cloned());
        }

        let probes = resolve_probes(spec.and_then(|s| s.healthcheck.as_ref()));
        let lifecycle = post_start_lifecycle(spec.and_then(|s| s.hooks.as_ref()));
        let metadata = resolve_metadata(&app.labels, &app.annotations, RuleContext { version: dep.version, process_name: name })?;

        Ok(ProcessValues {
            name: name.to_string(),
            cmd,
            units,
            routable,
            public_service_port: ports.public_service_port(),
            container_ports: ports.container_ports,
            service_ports: ports.service_ports,
            env,
            liveness_probe: probes.liveness,
            readiness_probe: probes.readiness,
            startup_probe: probes.startup,
            lifecycle,
            security_context: spec.and_then(|s| s.security_context.clone()),
            resources: spec.and_then(|s| s.resources.clone()),
            volumes: spec.map(|s| s.volumes.clone()).unwrap_or_default(),
            volume_mounts: spec.map(|s| s.volume_mounts.clone()).unwrap_or_default(),
            deployment_metadata: metadata.deployment,
            service_metadata: metadata.service,
            pod_metadata: metadata.pod,
        })
    }
}

/// Processes of one version: the procfile when shipped, else the explicit specs.
fn process_set(dep: &DeploymentSpec) -> CompileResult<Procfile> {
    match &dep.procfile {
        Some(text) => {
            let procfile = Procfile::parse(text)?;
            if let Some(stray) = dep.processes.iter().find(|p| !procfile.processes.contains_key(&p.name)) {
                return Err(CompileError::InvalidSpec(format!("process {:?} of version {} is not in its procfile", stray.name, dep.version)));
            }
            Ok(procfile)
        }
        None => {
            if let Some(p) = dep.processes.iter().find(|p| p.cmd.is_empty()) {
                return Err(CompileError::InvalidSpec(format!("process {:?} of version {} has no command and no procfile", p.name, dep.version)));
            }
            Procfile::from_processes(dep.processes.iter().map(|p| (p.name.clone(), p.cmd.clone())))
        }
    }
}

fn validate(app: &ApplicationSpec) -> CompileResult<()> {
    let invalid = |msg: String| Err(CompileError::InvalidSpec(msg));
    if app.name.trim().is_empty() {
        return invalid("application name is empty".into());
    }
    if app.deployments.is_empty() {
        return invalid(format!("application {:?} has no deployments", app.name));
    }
    let mut versions = BTreeSet::new();
    let mut total_weight = 0u32;
    for dep in &app.deployments {
        if dep.version.0 == 0 {
            return invalid("deployment versions start at 1".into());
        }
        if !versions.insert(dep.version) {
            return invalid(format!("deployment version {} appears twice", dep.version));
        }
        if dep.image.trim().is_empty() {
            return invalid(format!("deployment version {} has no image", dep.version));
        }
        let mut names = BTreeSet::new();
        for p in &dep.processes {
            if !keel_procfile::is_valid_name(&p.name) {
                return invalid(format!("process name {:?} in version {} must match [A-Za-z0-9_-]+", p.name, dep.version));
            }
            if !names.insert(p.name.as_str()) {
                return invalid(format!("process {:?} appears twice in version {}", p.name, dep.version));
            }
        }
        total_weight = total_weight.saturating_add(dep.routing_weight);
    }
    if total_weight > FULL_WEIGHT {
        return invalid(format!("routing weights add up to {} (max {})", total_weight, FULL_WEIGHT));
    }
    Ok(())
}
