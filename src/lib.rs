// Main library entry point for recurviz.

pub mod api;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use application::{trace, TraceError, TraceUsecase};
