//! Integration tests for kiln-lib: definitions loaded from a config
//! directory, rules run through a recording command runner, and whole
//! builds driven on the local engine.

mod common;
mod driver_tests;
mod scenario_tests;
