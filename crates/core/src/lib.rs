pub mod advisor;
pub mod asr;
pub mod config;
pub mod decode;
pub mod emotion;
pub mod features;
pub mod ingest;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use pipeline::{Pipeline, PipelineError, PipelineResult};
