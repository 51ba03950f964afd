//! Unit tests for DPoVP consensus implementation

pub mod helpers;
mod engine_tests;
mod fork_tests;
mod term_tests;
