//! Application layer
//!
//! Use cases wired from domain seams and infrastructure: the ingestion
//! orchestrator, the normalization stage, and the default payload to
//! product normalizer.

pub mod normalization;
pub mod orchestrator;
pub mod product_normalizer;

pub use normalization::NormalizationStage;
pub use orchestrator::{IngestionOrchestrator, RunReport};
pub use product_normalizer::{ProductNormalizer, project_product};
