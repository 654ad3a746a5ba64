pub mod app;
pub mod backend;
pub mod config;
pub mod coverage;
pub mod error;
pub mod http;
pub mod ingest;
pub mod loader;
pub mod local;
pub mod memory;
pub mod metrics;
pub mod nanopub;
pub mod output;
pub mod rdf;
pub mod rdf4j;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod status;
pub mod vocab;
