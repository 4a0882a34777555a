//! Custom domain classification into plain-HTTP and TLS endpoints.

use keel_core::{CompileError, CompileResult, IngressControllerSpec, IngressSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CompilerConfig;

static NON_DNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Who obtains and rotates the certificate behind a TLS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateManagement {
    /// Issued through the environment's cluster issuer.
    CertManager,
    /// Supplied by the operator as an existing secret.
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsEndpoint {
    pub cname: String,
    pub secret_name: String,
    pub unique_name: String,
    pub managed_by: CertificateManagement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressEndpoints {
    pub http: Vec<String>,
    pub https: Vec<HttpsEndpoint>,
}

/// Lowercase and collapse every run of characters outside `[a-z0-9]` into `-`.
pub fn dns_label(name: &str) -> String {
    NON_DNS.replace_all(&name.to_lowercase(), "-").into_owned()
}

pub fn resolve_endpoints(app: &str, ingress: &IngressSpec, controller: &IngressControllerSpec, cfg: &CompilerConfig) -> CompileResult<IngressEndpoints> {
    let mut out = IngressEndpoints::default();
    for domain in &ingress.cnames {
        if !domain.secure {
            out.http.push(domain.name.clone());
            continue;
        }
        if controller.cluster_issuer.as_deref().filter(|i| !i.trim().is_empty()).is_none() {
            return Err(CompileError::MissingClusterIssuer { domain: domain.name.clone() });
        }
        let stripped = dns_label(&domain.name);
        let (secret_name, managed_by) = match &domain.secret_name {
            Some(secret) => (secret.clone(), CertificateManagement::User),
            None => (format!("{}-cname-{}", app, stripped), CertificateManagement::CertManager),
        };
        debug!(domain = %domain.name, secret = %secret_name, managed_by = ?managed_by, "resolved https endpoint");
        out.https.push(HttpsEndpoint { cname: domain.name.clone(), secret_name, unique_name: format!("{}-https-{}", app, stripped), managed_by });
    }
    if ingress.generate_default_cname {
        if let Some(endpoint) = controller.service_endpoint.as_deref().filter(|e| !e.is_empty()) {
            out.http.push(format!("{}.{}.{}", app, endpoint, cfg.base_domain));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::CustomDomain;

    fn domain(name: &str, secure: bool, secret: Option<&str>) -> CustomDomain {
        CustomDomain { name: name.into(), secure, secret_name: secret.map(str::to_string) }
    }

    fn issuer() -> IngressControllerSpec {
        IngressControllerSpec { cluster_issuer: Some("letsencrypt".into()), service_endpoint: Some("10.0.0.1".into()), ..Default::default() }
    }

    #[test]
    fn dns_label_collapses_runs() {
        assert_eq!(dns_label("Shop.Example.com"), "shop-example-com");
        assert_eq!(dns_label("a..b__c"), "a-b-c");
        assert_eq!(dns_label("*.wild.io"), "-wild-io");
    }

    #[test]
    fn secure_without_issuer_fails() {
        let ingress = IngressSpec { generate_default_cname: false, cnames: vec![domain("plain.io", false, None), domain("shop.example.com", true, None)] };
        let err = resolve_endpoints("shop", &ingress, &IngressControllerSpec::default(), &CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::MissingClusterIssuer { ref domain } if domain == "shop.example.com"));
    }

    #[test]
    fn blank_issuer_counts_as_missing() {
        let ingress = IngressSpec { generate_default_cname: false, cnames: vec![domain("shop.example.com", true, None)] };
        for blank in ["", "  "] {
            let controller = IngressControllerSpec { cluster_issuer: Some(blank.into()), ..Default::default() };
            let err = resolve_endpoints("shop", &ingress, &controller, &CompilerConfig::default()).unwrap_err();
            assert!(matches!(err, CompileError::MissingClusterIssuer { ref domain } if domain == "shop.example.com"));
        }
    }

    #[test]
    fn secret_decides_management() {
        let ingress = IngressSpec {
            generate_default_cname: false,
            cnames: vec![domain("shop.example.com", true, None), domain("admin.example.com", true, Some("admin-tls"))],
        };
        let out = resolve_endpoints("shop", &ingress, &issuer(), &CompilerConfig::default()).unwrap();
        assert_eq!(out.https[0].managed_by, CertificateManagement::CertManager);
        assert_eq!(out.https[0].secret_name, "shop-cname-shop-example-com");
        assert_eq!(out.https[0].unique_name, "shop-https-shop-example-com");
        assert_eq!(out.https[1].managed_by, CertificateManagement::User);
        assert_eq!(out.https[1].secret_name, "admin-tls");
        assert_eq!(out.https[1].unique_name, "shop-https-admin-example-com");
        assert!(out.http.is_empty());
    }

    #[test]
    fn default_cname_needs_service_endpoint() {
        let ingress = IngressSpec { generate_default_cname: true, cnames: vec![domain("plain.io", false, None)] };
        let out = resolve_endpoints("shop", &ingress, &issuer(), &CompilerConfig::default()).unwrap();
        assert_eq!(out.http, vec!["plain.io".to_string(), "shop.10.0.0.1.keel.cloud".to_string()]);

        let out = resolve_endpoints("shop", &ingress, &IngressControllerSpec::default(), &CompilerConfig::default()).unwrap();
        assert_eq!(out.http, vec!["plain.io".to_string()]);
    }
}
