//! Finalize-time reporting for labels that never got bound

use std::fs;
use std::sync::Arc;

use crate::emitter::Label;
use crate::ir::builder::Builder;
use crate::util::diag::{
    self,
    DiagnosticRenderer,
    NamedSource,
    SourceSpan,
    UnboundLabelDiagnostic,
};

use rustc_hash::FxHashMap;

/// Pre-rendered report of every label that is referenced by a jump but
/// was never bound into the list.
pub struct UnboundLabels {
    pub labels: Vec<Label>,
    pub rendered: String,
}

impl std::fmt::Display for UnboundLabels {
    #[inline(always)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}

// Debug leads with a newline so the rendered reports line up when a
// caller unwraps or logs the error.
impl std::fmt::Debug for UnboundLabels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        f.write_str(&self.rendered)
    }
}

impl std::error::Error for UnboundLabels {}

impl Builder {
    /// Labels with incoming jumps whose canonical node is not in the
    /// list (so replay would never bind them).
    #[must_use]
    pub fn unbound_labels(&self) -> Vec<Label> {
        let mut unbound = Vec::new();
        for slot in &self.label_nodes {
            let Some(id) = *slot else { continue };
            let Some(node) = self.node(id) else { continue };
            let Some(data) = node.label_data() else { continue };
            if data.num_refs > 0 && !self.node_in_list(id) {
                unbound.push(data.label);
            }
        }
        unbound
    }

    /// Render the unbound labels with the source locations recorded at
    /// `new_label`, one report per label. `None` when everything is
    /// bound.
    #[must_use]
    pub fn unbound_report(&self) -> Option<UnboundLabels> {
        let labels = self.unbound_labels();
        if labels.is_empty() {
            return None;
        }

        let renderer = DiagnosticRenderer::default();
        let mut file_cache = FxHashMap::<&'static str, Arc<str>>::default();

        let reports = labels
            .iter()
            .map(|&label| {
                let name = format!("L{index}", index = label.index());
                let origin = self
                    .label_origins
                    .get(label.index() as usize)
                    .copied()
                    .flatten();

                let Some(origin) = origin else {
                    return format!("error: unbound label '{name}'");
                };

                let path = origin.file();
                let content = file_cache.entry(path).or_insert_with(|| {
                    fs::read_to_string(path).unwrap_or_default().into()
                });
                let source = Arc::clone(content);

                let offset = diag::byte_offset(
                    &source,
                    origin.line() as usize,
                    origin.column() as usize,
                );
                let diagnostic = UnboundLabelDiagnostic {
                    name,
                    src: NamedSource::new(path, source),
                    span: SourceSpan::new(offset, 1),
                };
                renderer.render_to_string(&diagnostic)
            })
            .collect::<Vec<_>>();

        Some(UnboundLabels { labels, rendered: reports.join("\n\n") })
    }
}
