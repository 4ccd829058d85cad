//! Dockyard - layer-cached build-and-bootstrap pipeline
//!
//! Turns a dependency lock file and an application source tree into a
//! running network service. Each stage (toolchain, dependencies, source)
//! produces a content-addressed layer that is reused while its inputs
//! are unchanged.

pub mod audit;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod fetch;
pub mod install;
pub mod layer;
pub mod lock;
pub mod pipeline;
pub mod runtime;
pub mod service;
pub mod stage;
pub mod toolchain;
pub mod ui;

pub use error::{DockyardError, DockyardResult};
