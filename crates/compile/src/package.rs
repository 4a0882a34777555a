//! Chart configuration, template sets and the installer hand-off.

use std::collections::BTreeMap;

use anyhow::Result;
use keel_core::{ApplicationSpec, CompileError, CompileResult, EnvironmentSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compiler::DeploymentCompiler;
use crate::values::Values;

/// File name -> template body, merged verbatim into the package.
pub type TemplateSet = BTreeMap<String, String>;

/// Chart metadata accompanying the value tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub api_version: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub app_version: String,
}

/// Source of template sets, keyed by name.
pub trait TemplateReader {
    /// `Ok(None)` when no set exists under `name`.
    fn get(&self, name: &str) -> Result<Option<TemplateSet>>;
}

/// Accepts a compiled package and materializes it.
pub trait Installer {
    fn install(&self, package: &Package) -> Result<()>;
}

/// In-memory template sets.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplates {
    sets: BTreeMap<String, TemplateSet>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(mut self, name: impl Into<String>, set: TemplateSet) -> Self {
        self.sets.insert(name.into(), set);
        self
    }
}

impl TemplateReader for MemoryTemplates {
    fn get(&self, name: &str) -> Result<Option<TemplateSet>> {
        Ok(self.sets.get(name).cloned())
    }
}

/// Everything the installer needs for one application.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub chart: ChartConfig,
    pub values: Values,
    pub templates: TemplateSet,
}

impl DeploymentCompiler {
    pub fn chart_config(&self, app: &ApplicationSpec) -> ChartConfig {
        let cfg = self.config();
        ChartConfig {
            api_version: "v2".to_string(),
            name: app.name.clone(),
            version: cfg.chart_version.clone(),
            description: app.description.clone().unwrap_or_else(|| cfg.chart_description.clone()),
            app_version: app.version.clone().unwrap_or_else(|| cfg.chart_version.clone()),
        }
    }

    /// Compile and pair the values with the template set for the environment's ingress type.
    pub fn build_package(&self, app: &ApplicationSpec, env: &EnvironmentSpec, reader: &dyn TemplateReader) -> CompileResult<Package> {
        let values = self.compile(app, env)?;
        let name = env.ingress_controller.ingress_type.as_str();
        let templates = match reader.get(name) {
            Ok(Some(set)) => set,
            Ok(None) => return Err(CompileError::TemplatesNotFound { name: name.to_string() }),
            Err(error) => return Err(CompileError::Templates { name: name.to_string(), error }),
        };
        debug!(app = %app.name, templates = name, files = templates.len(), "assembled package");
        Ok(Package { chart: self.chart_config(app), values, templates })
    }
}

/// Hand a package to the installer; its failure surfaces as a compile-stage error.
pub fn install(package: &Package, installer: &dyn Installer) -> CompileResult<()> {
    installer.install(package).map_err(CompileError::Install)?;
    info!(app = %package.chart.name, version = %package.chart.version, "package installed");
    Ok(())
}
