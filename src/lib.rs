pub mod app;
pub mod assembly;
pub mod config;
pub mod cypher;
pub mod date;
pub mod domain;
pub mod entrez;
pub mod error;
pub mod escape;
pub mod geo;
pub mod graph;
pub mod loader;
pub mod mapper;
pub mod output;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod xml;
