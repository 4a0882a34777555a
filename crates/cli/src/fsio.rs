//! Directory-backed template reader and installer.
//!
//! Templates live at `<root>/<set>/<file>`; a package is written to
//! `<out>/<chart>/{Chart.yaml,values.yaml,templates/*}`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keel_compile::{Installer, Package, TemplateReader, TemplateSet};
use tracing::debug;

pub struct DirTemplateReader {
    root: PathBuf,
}

impl DirTemplateReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateReader for DirTemplateReader {
    fn get(&self, name: &str) -> Result<Option<TemplateSet>> {
        let dir = self.root.join(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", dir.display())),
        };
        let mut set = TemplateSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file = entry.file_name().to_string_lossy().into_owned();
            let body = fs::read_to_string(entry.path()).with_context(|| format!("reading template {}", file))?;
            set.insert(file, body);
        }
        debug!(set = name, files = set.len(), "loaded templates");
        Ok(Some(set))
    }
}

pub struct DirInstaller {
    out: PathBuf,
}

impl DirInstaller {
    pub fn new(out: impl Into<PathBuf>) -> Self {
        Self { out: out.into() }
    }

    pub fn chart_dir(&self, package: &Package) -> PathBuf {
        self.out.join(&package.chart.name)
    }
}

fn write(path: &Path, body: &str) -> Result<()> {
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))
}

impl Installer for DirInstaller {
    fn install(&self, package: &Package) -> Result<()> {
        let chart_dir = self.chart_dir(package);
        let templates_dir = chart_dir.join("templates");
        fs::create_dir_all(&templates_dir).with_context(|| format!("creating {}", templates_dir.display()))?;
        write(&chart_dir.join("Chart.yaml"), &serde_yaml::to_string(&package.chart)?)?;
        write(&chart_dir.join("values.yaml"), &package.values.to_yaml()?)?;
        for (file, body) in &package.templates {
            write(&templates_dir.join(file), body)?;
        }
        Ok(())
    }
}
