//! Keel core types: application/environment specs and the compile error taxonomy.

#![forbid(unsafe_code)]

pub mod error;
pub mod spec;

pub use error::CompileError;
pub use spec::{
    ApplicationSpec, CanarySpec, CustomDomain, DeploymentSpec, DeploymentVersion, EnvironmentSpec, ExposedPort,
    HealthCheckSpec, HooksSpec, IngressControllerSpec, IngressControllerType, IngressSpec, MetadataRule, PortSpec,
    ProcessSpec, RestartHooks, TargetKind, TargetRef,
};

/// Result alias used across the compiler crates.
pub type CompileResult<T> = Result<T, CompileError>;

/// Name of the process that wins routability when present.
pub const ROUTABLE_PROCESS_NAME: &str = "web";

/// Weight that a sole deployment receives; canary splits always sum to this.
pub const FULL_WEIGHT: u32 = 100;
