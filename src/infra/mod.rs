//! `reqwest`-backed adapters for the remote collaborator contracts.

pub mod http_categorizer;
pub mod http_context;

pub use http_categorizer::HttpCategorizer;
pub use http_context::HttpContextProvider;
