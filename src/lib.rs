//! Index-and-query core for a vector search service: a typed schema/field
//! model, a filter-expression parser, a document translator, a query
//! compiler, a deterministic rank-profile/schema generator, and a versioned
//! application-package lifecycle. HTTP serving, embedding inference, and CLI
//! wiring are external collaborators, reached only through [`vespa`].

pub mod app_package;
pub mod config;
pub mod document;
pub mod error;
pub mod field;
pub mod filter;
pub mod index_descriptor;
pub mod metrics;
pub mod model_cache;
pub mod query;
pub mod schema_gen;
pub mod services_manifest;
pub mod settings_store;
pub mod vespa;

pub use error::{CoreError, Result};
