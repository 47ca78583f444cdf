//! kubepack engine - Helm-compatible chart rendering
//!
//! This crate turns a chart plus values into the ordered documents a
//! release is made of:
//! - a [`TemplateEngine`] seam with a MiniJinja implementation
//! - Helm-style filters (`toYaml`, `nindent`, `b64enc`, `quote` ...)
//! - hook parsing and Helm's canonical install ordering
//! - subchart rendering with scoped values

pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;
pub mod hooks;
pub mod manifest;
pub mod renderer;
pub mod sort;

pub use engine::{JinjaEngine, JinjaEngineBuilder, RenderedTemplate, TemplateEngine};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use hooks::Hook;
pub use manifest::{Document, join_manifest, parse_manifest, split_api_version, split_documents};
pub use renderer::{CrdFile, RenderRequest, RenderResult, Renderer, effective_values};
