//! Keel compile: turn an application spec plus a target environment into a chart value
//! tree.
//!
//! The compiler is pure. It reads its inputs, resolves processes, ports, probes,
//! metadata and ingress endpoints, and returns either a complete [`Values`] tree or the
//! first [`CompileError`]. Templates and installation go through the [`TemplateReader`]
//! and [`Installer`] traits so callers own all I/O.

#![forbid(unsafe_code)]

pub mod compiler;
pub mod config;
pub mod health;
pub mod ingress;
pub mod metadata;
pub mod package;
pub mod ports;
pub mod values;

pub use compiler::DeploymentCompiler;
pub use config::CompilerConfig;
pub use ingress::{CertificateManagement, HttpsEndpoint, IngressEndpoints};
pub use keel_core::{CompileError, CompileResult};
pub use metadata::{MetadataBucket, ProcessMetadata};
pub use package::{install, ChartConfig, Installer, MemoryTemplates, Package, TemplateReader, TemplateSet};
pub use values::{AppValues, DeploymentValues, ProcessValues, RoutingSettings, Values};
