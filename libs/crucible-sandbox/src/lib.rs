//! Untrusted code execution sandbox.
//!
//! A submission flows through [`workspace::prepare`], a
//! [`engine::ContainerRuntime`] run, and [`interpreter::interpret`], all
//! driven by [`sandbox::CodeSandbox::execute`].

pub mod config;
pub mod engine;
pub mod error;
pub mod harness;
pub mod interpreter;
pub mod sandbox;
pub mod workspace;

#[cfg(test)]
mod engine_tests;

pub use config::SandboxConfig;
pub use engine::{ContainerExit, ContainerRequest, ContainerRuntime, DockerEngine};
pub use error::{SandboxError, SubmitError};
pub use sandbox::{CodeSandbox, Execution};
