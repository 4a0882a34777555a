//! Probe and restart-hook projection into pod-level process extras.

use k8s_openapi::api::core::v1::{ExecAction, Lifecycle, LifecycleHandler, Probe};
use keel_core::{HealthCheckSpec, HooksSpec};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Probes {
    pub liveness: Option<Probe>,
    pub readiness: Option<Probe>,
    pub startup: Option<Probe>,
}

/// Copy configured probes through unchanged; no health check means no probes.
pub fn resolve_probes(healthcheck: Option<&HealthCheckSpec>) -> Probes {
    match healthcheck {
        Some(hc) => Probes {
            liveness: hc.liveness_probe.clone(),
            readiness: hc.readiness_probe.clone(),
            startup: hc.startup_probe.clone(),
        },
        None => Probes::default(),
    }
}

/// Post-restart hook commands become a single `sh -c "a && b"` post-start handler.
pub fn post_start_lifecycle(hooks: Option<&HooksSpec>) -> Option<Lifecycle> {
    let after = &hooks?.restart.after;
    if after.is_empty() {
        return None;
    }
    let command = vec!["sh".to_string(), "-c".to_string(), after.join(" && ")];
    Some(Lifecycle {
        post_start: Some(LifecycleHandler { exec: Some(ExecAction { command: Some(command) }), ..Default::default() }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::HTTPGetAction;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use keel_core::RestartHooks;

    #[test]
    fn probes_pass_through_unchanged() {
        let probe = Probe {
            http_get: Some(HTTPGetAction { path: Some("/healthz".into()), port: IntOrString::Int(8080), ..Default::default() }),
            period_seconds: Some(5),
            ..Default::default()
        };
        let hc = HealthCheckSpec { readiness_probe: Some(probe.clone()), ..Default::default() };
        let p = resolve_probes(Some(&hc));
        assert_eq!(p.readiness, Some(probe.clone()));
        assert!(p.liveness.is_none());
        assert!(p.startup.is_none());
        assert_eq!(resolve_probes(None), Probes::default());

        let liveness = Probe { period_seconds: Some(10), failure_threshold: Some(3), ..probe.clone() };
        let startup = Probe { initial_delay_seconds: Some(30), ..probe.clone() };
        let hc = HealthCheckSpec { liveness_probe: Some(liveness.clone()), readiness_probe: Some(probe.clone()), startup_probe: Some(startup.clone()) };
        let p = resolve_probes(Some(&hc));
        assert_eq!(p.liveness, Some(liveness));
        assert_eq!(p.readiness, Some(probe));
        assert_eq!(p.startup, Some(startup));
    }

    #[test]
    fn restart_hooks_join_into_post_start() {
        let hooks = HooksSpec { restart: RestartHooks { before: vec!["ignored".into()], after: vec!["migrate".into(), "warm-cache --all".into()] } };
        let lc = post_start_lifecycle(Some(&hooks)).unwrap();
        let cmd = lc.post_start.unwrap().exec.unwrap().command.unwrap();
        assert_eq!(cmd, vec!["sh".to_string(), "-c".to_string(), "migrate && warm-cache --all".to_string()]);
        assert!(lc.pre_stop.is_none());
    }

    #[test]
    fn no_after_hooks_no_lifecycle() {
        assert!(post_start_lifecycle(None).is_none());
        assert!(post_start_lifecycle(Some(&HooksSpec::default())).is_none());
    }
}
