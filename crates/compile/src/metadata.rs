//! Scoped label/annotation rules merged into per-artifact metadata buckets.
//!
//! Rules are evaluated in input order. A rule applies when its target resolves to a
//! known kind and its version/process filters are unset or equal to the artifact's.
//! Matching pairs are merged into the bucket for that kind, later rules overwriting
//! earlier ones key by key.

use std::collections::BTreeMap;

use keel_core::{CompileError, CompileResult, DeploymentVersion, MetadataRule, TargetKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBucket {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// One bucket per artifact kind generated for a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetadata {
    pub deployment: MetadataBucket,
    pub service: MetadataBucket,
    pub pod: MetadataBucket,
}

impl ProcessMetadata {
    pub fn bucket(&self, kind: TargetKind) -> &MetadataBucket {
        match kind {
            TargetKind::Deployment => &self.deployment,
            TargetKind::Service => &self.service,
            TargetKind::Pod => &self.pod,
        }
    }

    fn bucket_mut(&mut self, kind: TargetKind) -> &mut MetadataBucket {
        match kind {
            TargetKind::Deployment => &mut self.deployment,
            TargetKind::Service => &mut self.service,
            TargetKind::Pod => &mut self.pod,
        }
    }
}

/// The artifact a rule is being tested against.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub version: DeploymentVersion,
    pub process_name: &'a str,
}

/// Kind the rule lands in, if it applies to `ctx`.
pub fn rule_applies(rule: &MetadataRule, ctx: RuleContext<'_>) -> Option<TargetKind> {
    let kind = rule.target.kind()?;
    let version_ok = rule.deployment_version == 0 || rule.deployment_version == ctx.version.0;
    let process_ok = rule.process_name.is_empty() || rule.process_name == ctx.process_name;
    (version_ok && process_ok).then_some(kind)
}

pub fn validate_key(key: &str) -> CompileResult<()> {
    if key.is_empty() || key.starts_with('_') {
        return Err(CompileError::MalformedMetadataKey { key: key.to_string() });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Labels,
    Annotations,
}

fn merge(out: &mut ProcessMetadata, rules: &[MetadataRule], field: Field, ctx: RuleContext<'_>) -> CompileResult<()> {
    for (idx, rule) in rules.iter().enumerate() {
        let Some(kind) = rule_applies(rule, ctx) else {
            if rule.target.kind().is_none() {
                debug!(idx, api_version = %rule.target.api_version, kind = %rule.target.kind, "metadata rule targets unsupported kind");
            }
            continue;
        };
        for key in rule.apply.keys() {
            validate_key(key)?;
        }
        let bucket = out.bucket_mut(kind);
        let dst = match field {
            Field::Labels => &mut bucket.labels,
            Field::Annotations => &mut bucket.annotations,
        };
        dst.extend(rule.apply.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(())
}

/// Build the metadata buckets for one process of one version.
///
/// Any malformed key fails the whole call; the partially merged buckets are dropped.
pub fn resolve_metadata(labels: &[MetadataRule], annotations: &[MetadataRule], ctx: RuleContext<'_>) -> CompileResult<ProcessMetadata> {
    let mut out = ProcessMetadata::default();
    merge(&mut out, labels, Field::Labels, ctx)?;
    merge(&mut out, annotations, Field::Annotations, ctx)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::TargetRef;

    fn rule(kind: (&str, &str), version: u32, process: &str, pairs: &[(&str, &str)]) -> MetadataRule {
        MetadataRule {
            target: TargetRef { api_version: kind.0.into(), kind: kind.1.into() },
            deployment_version: version,
            process_name: process.into(),
            apply: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    const DEP: (&str, &str) = ("apps/v1", "Deployment");
    const SVC: (&str, &str) = ("v1", "Service");
    const POD: (&str, &str) = ("v1", "Pod");

    fn ctx(version: u32, process: &str) -> RuleContext<'_> {
        RuleContext { version: DeploymentVersion(version), process_name: process }
    }

    #[test]
    fn filters_must_be_unset_or_equal() {
        let r = rule(DEP, 2, "web", &[("a", "b")]);
        assert_eq!(rule_applies(&r, ctx(2, "web")), Some(TargetKind::Deployment));
        assert_eq!(rule_applies(&r, ctx(1, "web")), None);
        assert_eq!(rule_applies(&r, ctx(2, "worker")), None);
        let any = rule(POD, 0, "", &[]);
        assert_eq!(rule_applies(&any, ctx(7, "anything")), Some(TargetKind::Pod));
        let unknown = rule(("batch/v1", "Job"), 0, "", &[]);
        assert_eq!(rule_applies(&unknown, ctx(1, "web")), None);
    }

    #[test]
    fn later_rule_wins_per_key() {
        let labels = vec![rule(SVC, 0, "", &[("tier", "gold"), ("team", "a")]), rule(SVC, 0, "", &[("tier", "silver")])];
        let md = resolve_metadata(&labels, &[], ctx(1, "web")).unwrap();
        assert_eq!(md.service.labels["tier"], "silver");
        assert_eq!(md.service.labels["team"], "a");
        assert!(md.deployment.labels.is_empty());
    }

    #[test]
    fn filtered_and_unfiltered_both_apply() {
        let labels = vec![rule(DEP, 0, "", &[("x", "any")]), rule(DEP, 3, "web", &[("x", "scoped")])];
        let md = resolve_metadata(&labels, &[], ctx(3, "web")).unwrap();
        assert_eq!(md.bucket(TargetKind::Deployment).labels["x"], "scoped");
        let md = resolve_metadata(&labels, &[], ctx(2, "web")).unwrap();
        assert_eq!(md.bucket(TargetKind::Deployment).labels["x"], "any");
    }

    #[test]
    fn labels_and_annotations_land_separately() {
        let labels = vec![rule(POD, 0, "", &[("k", "label")])];
        let annotations = vec![rule(POD, 0, "", &[("k", "annotation")])];
        let md = resolve_metadata(&labels, &annotations, ctx(1, "web")).unwrap();
        assert_eq!(md.pod.labels["k"], "label");
        assert_eq!(md.pod.annotations["k"], "annotation");
    }

    #[test]
    fn underscore_key_fails_only_when_rule_applies() {
        let labels = vec![rule(DEP, 0, "", &[("ok", "1")]), rule(DEP, 0, "worker", &[("_bad", "1")])];
        assert!(resolve_metadata(&labels, &[], ctx(1, "web")).is_ok());
        let err = resolve_metadata(&labels, &[], ctx(1, "worker")).unwrap_err();
        assert!(matches!(err, CompileError::MalformedMetadataKey { ref key } if key == "_bad"), "err={}", err);
    }
}
