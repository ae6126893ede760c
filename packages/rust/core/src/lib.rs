//! Page assembly for Folio.
//!
//! This crate provides:
//! - [`PageAssembler`]: the per-request fetch orchestrator
//! - [`ProcessorRegistry`]: module and page processors, with built-ins

pub mod assembler;
pub mod processors;

pub use assembler::{AssembledPage, FetchFailure, PageAssembler, PageOutcome};
pub use processors::{
    FetchDescriptor, ModuleProcessor, PageProcessor, ProcessorRegistry,
};
