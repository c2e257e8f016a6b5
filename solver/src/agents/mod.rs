//! Agents that drive text generation for the solver.

pub mod generator;
