//! Convergence diagnostics through the Phylobayes comparison tools

pub mod collector;
pub mod parser;

pub use collector::PbToolsCollector;
