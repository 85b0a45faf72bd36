//! Diagnostic rendering for unbound-label reports

use std::sync::Arc;

#[cfg(feature = "fancy-diagnostics")]
use miette::{
    Diagnostic,
    MietteError,
    SourceCode,
    SpanContents,
    LabeledSpan,
    GraphicalReportHandler,
};

/// A byte range in a source file.
#[derive(Copy, Clone, Debug)]
pub struct SourceSpan {
    pub offset: usize,
    pub length: usize,
}

impl SourceSpan {
    #[inline(always)]
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }
}

/// A named source file with its content.
#[derive(Debug, Clone)]
pub struct NamedSource {
    pub name: Arc<str>,
    pub source: Arc<str>,
}

impl NamedSource {
    #[inline(always)]
    pub fn new(name: impl Into<Arc<str>>, source: impl Into<Arc<str>>) -> Self {
        Self { name: name.into(), source: source.into() }
    }
}

#[cfg(feature = "fancy-diagnostics")]
impl SourceCode for NamedSource {
    #[inline(always)]
    fn read_span<'a>(
        &'a self,
        span: &miette::SourceSpan,
        context_lines_before: usize,
        context_lines_after: usize,
    ) -> Result<Box<dyn SpanContents<'a> + 'a>, MietteError> {
        self.source
            .read_span(span, context_lines_before, context_lines_after)
    }
}

/// A label that is referenced by at least one jump but was never bound.
pub struct UnboundLabelDiagnostic {
    pub name: String,
    pub src: NamedSource,
    pub span: SourceSpan,
}

impl std::fmt::Display for UnboundLabelDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unbound label '{name}'", name = self.name)
    }
}

impl std::fmt::Debug for UnboundLabelDiagnostic {
    #[inline(always)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for UnboundLabelDiagnostic {}

#[cfg(feature = "fancy-diagnostics")]
impl Diagnostic for UnboundLabelDiagnostic {
    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let span = self.span.offset..self.span.offset + self.span.length;
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some("label created here, never bound".to_owned()),
            span,
        ))))
    }
}

/// Byte offset of 1-based `line`:`column` in `text`, clamped to the line.
pub fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let bytes = text.as_bytes();

    let mut remaining = line.saturating_sub(1);
    let mut line_start = 0usize;
    let mut newlines = memchr::memchr_iter(b'\n', bytes);
    while remaining > 0 {
        match newlines.next() {
            Some(pos) => {
                line_start = pos + 1;
                remaining -= 1;
            }
            None => break,
        }
    }

    let line_end = memchr::memchr(b'\n', &bytes[line_start..])
        .map_or(text.len(), |pos| line_start + pos);

    let col0 = column.saturating_sub(1).min(line_end - line_start);
    line_start + col0
}

#[derive(Default)]
#[cfg(not(feature = "fancy-diagnostics"))]
pub struct DiagnosticRenderer {}

#[cfg(feature = "fancy-diagnostics")]
pub struct DiagnosticRenderer {
    handler: GraphicalReportHandler,
}

#[cfg(feature = "fancy-diagnostics")]
impl Default for DiagnosticRenderer {
    #[inline(always)]
    fn default() -> Self {
        Self { handler: GraphicalReportHandler::new() }
    }
}

impl DiagnosticRenderer {
    #[inline]
    #[cfg(feature = "fancy-diagnostics")]
    pub fn render_to_string(&self, diag: &UnboundLabelDiagnostic) -> String {
        let mut rendered = String::with_capacity(512);
        if self.handler.render_report(&mut rendered, diag).is_err() {
            rendered = render_plain(diag);
        }
        rendered
    }

    #[inline]
    #[cfg(not(feature = "fancy-diagnostics"))]
    pub fn render_to_string(&self, diag: &UnboundLabelDiagnostic) -> String {
        render_plain(diag)
    }
}

/// Plain caret-line rendering used when fancy diagnostics are disabled
/// (or fail to render).
fn render_plain(diag: &UnboundLabelDiagnostic) -> String {
    let text = diag.src.source.as_ref();
    let bytes = text.as_bytes();
    let offset = diag.span.offset.min(text.len());

    let line_start = memchr::memrchr(b'\n', &bytes[..offset])
        .map_or(0, |pos| pos + 1);
    let line_end = memchr::memchr(b'\n', &bytes[offset..])
        .map_or(text.len(), |pos| offset + pos);

    let line = &text[line_start..line_end];
    let line_number = bytecount::count(&bytes[..line_start], b'\n') + 1;
    let column = offset - line_start + 1;

    let caret = " ".repeat(column - 1) + &"^".repeat(diag.span.length.max(1));
    let lstr = line_number.to_string();
    let lpad = " ".repeat(lstr.len());

    format!{
        "error: unbound label '{name}'\n  --> {src}:{lnum}:{col}\n{lpad} |\n{lstr} | {line}\n{lpad} | {caret}\n",
        name = diag.name,
        src = diag.src.name,
        lnum = line_number,
        col = column,
    }
}
