//! Versioned prompt templates.

pub mod registry;
pub mod templates;

pub use registry::{PromptTemplate, TemplateData, TemplateRegistry};
