//! Test suites for the evaluation engine
//!
//! This module organizes tests into logical groups: topology resolution,
//! pass-level engine behavior, the service task, and property-based checks.

#[cfg(test)]
mod service_tests;
#[cfg(test)]
mod property_tests;
