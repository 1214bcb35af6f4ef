//! kiln-lib: build orchestration for native packages.
//!
//! A [`project::Project`] is an ordered set of [`component::Component`]s
//! built for one [`platform::Platform`]. The [`rules`] module turns a project
//! into make rules, an [`engine::Engine`] supplies the build host, and the
//! [`driver`] runs the whole pipeline, from host selection to artifact
//! retrieval and teardown.

pub mod component;
pub mod config;
pub mod consts;
pub mod driver;
pub mod engine;
pub mod error;
pub mod graph;
pub mod packaging;
pub mod placeholder;
pub mod platform;
pub mod process;
pub mod project;
pub mod retry;
pub mod rules;
pub mod source;
pub mod util;
pub mod vcs;
