//! Renderer dispatch
//!
//! Maps a result kind tag plus an output format to a renderer. No runtime
//! type introspection: the fallback walk is a hand-coded partial order over
//! kinds (specific kind → `"composite"` → the generic renderer). Renderers
//! are pluggable consumers; the two built-ins cover the plain-text tree and
//! the JSON contract.

use std::collections::BTreeMap;

use crate::result::{AnalysisResult, ResultPayload};

/// Output formats the registry dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderFormat {
    Text,
    Json,
}

/// A renderer turns one result (sub)tree into a string.
pub trait Renderer: Send + Sync {
    fn render(&self, result: &AnalysisResult) -> String;
}

/// Registry keyed by `(kind, format)` with fallback resolution.
pub struct RendererRegistry {
    renderers: BTreeMap<(String, RenderFormat), Box<dyn Renderer>>,
    generic: BTreeMap<RenderFormat, Box<dyn Renderer>>,
}

impl RendererRegistry {
    pub fn empty() -> Self {
        Self {
            renderers: BTreeMap::new(),
            generic: BTreeMap::new(),
        }
    }

    /// Registry with the built-in text and JSON renderers as generics.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_generic(RenderFormat::Text, Box::new(TextRenderer));
        registry.register_generic(RenderFormat::Json, Box::new(JsonRenderer));
        registry
    }

    pub fn register(&mut self, kind: &str, format: RenderFormat, renderer: Box<dyn Renderer>) {
        self.renderers
            .insert((kind.to_string(), format), renderer);
    }

    pub fn register_generic(&mut self, format: RenderFormat, renderer: Box<dyn Renderer>) {
        self.generic.insert(format, renderer);
    }

    /// Resolve a renderer for the result: exact kind, then each fallback kind
    /// in order, then the generic for the format.
    pub fn select(&self, result: &AnalysisResult, format: RenderFormat) -> Option<&dyn Renderer> {
        let mut kinds = vec![result.kind()];
        kinds.extend(fallback_kinds(result.kind()));
        for kind in kinds {
            if let Some(renderer) = self.renderers.get(&(kind.to_string(), format)) {
                return Some(renderer.as_ref());
            }
        }
        self.generic.get(&format).map(|r| r.as_ref())
    }

    /// Render with the resolved renderer; empty registry renders nothing.
    pub fn render(&self, result: &AnalysisResult, format: RenderFormat) -> Option<String> {
        self.select(result, format).map(|r| r.render(result))
    }
}

/// The hand-coded kind partial order used for fallback.
fn fallback_kinds(kind: &str) -> Vec<&'static str> {
    match kind {
        "composite" | "findings" => vec![],
        // Every typed payload falls back to the composite presentation
        _ => vec!["composite", "findings"],
    }
}

// =============================================================================
// BUILT-IN RENDERERS
// =============================================================================

/// Indented plain-text tree: severity, analyzer, summary, findings.
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, result: &AnalysisResult) -> String {
        let mut out = String::new();
        render_text(result, 0, &mut out);
        out
    }
}

fn render_text(result: &AnalysisResult, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{}[{}] {}: {}\n",
        indent, result.severity, result.analyzer, result.summary
    ));
    for finding in &result.findings {
        out.push_str(&format!(
            "{}  - [{}] {}: {}\n",
            indent, finding.severity, finding.category, finding.message
        ));
    }
    if let Some(ResultPayload::Verdict(report)) = &result.payload {
        let d = &report.time_distribution;
        out.push_str(&format!(
            "{}  time: running {:.1}% / blocked {:.1}% / waiting {:.1}% / io {:.1}% / gc {:.1}%\n",
            indent, d.running, d.blocked, d.waiting, d.io, d.gc
        ));
        if let Some(evolution) = &report.evolution {
            out.push_str(&format!(
                "{}  health trend: {:?} (change {})\n",
                indent, evolution.trend, evolution.score_change
            ));
        }
    }
    for child in &result.children {
        render_text(child, depth + 1, out);
    }
}

/// Pretty-printed JSON over the serde contract.
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, result: &AnalysisResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
