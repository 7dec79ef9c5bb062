// src/tests/mod.rs
//! Cross-module tests: registry wiring, the guarded services and
//! end-to-end breaker scenarios

mod directory_tests;
mod scenario_tests;
