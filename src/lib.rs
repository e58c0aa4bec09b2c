pub mod aggregate;
pub mod config;
pub mod domain;
pub mod error;
pub mod genotype;
pub mod gwas;
pub mod output;
pub mod pacing;
pub mod pipeline;
pub mod rank;
pub mod scoring;
pub mod search;
