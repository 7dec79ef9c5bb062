// src/breaker/tests/mod.rs
//! Tests for the breaker gate
