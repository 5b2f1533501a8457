use crate::span::SourcePos;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// Context provided to diagnostic template renderers while producing output lines.
pub struct DiagnosticRenderContext<'a> {
    pub context: &'a str,
    pub verbose_info: bool,
}

/// Trait for converting a diagnostic into human-readable output according to a template.
pub trait DiagnosticTemplateRenderer: Send + Sync {
    fn render(
        &self,
        diagnostic: &Diagnostic,
        ctx: &DiagnosticRenderContext<'_>,
    ) -> Option<Vec<String>>;
}

/// Built-in templates supported by the diagnostic manager.
#[derive(Clone)]
pub enum DiagnosticTemplate {
    Pretty,
    Plain,
    Custom(Arc<dyn DiagnosticTemplateRenderer>),
}

impl DiagnosticTemplate {
    fn render(
        &self,
        diagnostic: &Diagnostic,
        ctx: &DiagnosticRenderContext<'_>,
    ) -> Option<Vec<String>> {
        match self {
            DiagnosticTemplate::Pretty => render_pretty(diagnostic, ctx),
            DiagnosticTemplate::Plain => render_plain(diagnostic, ctx),
            DiagnosticTemplate::Custom(renderer) => renderer.render(diagnostic, ctx),
        }
    }
}

/// Runtime configuration for emitting diagnostics.
#[derive(Clone)]
pub struct DiagnosticDisplayOptions {
    pub template: DiagnosticTemplate,
    pub verbose_info: bool,
}

impl DiagnosticDisplayOptions {
    pub fn with_template(template: DiagnosticTemplate, verbose_info: bool) -> Self {
        Self {
            template,
            verbose_info,
        }
    }

    pub fn pretty(verbose_info: bool) -> Self {
        Self::with_template(DiagnosticTemplate::Pretty, verbose_info)
    }

    pub fn plain(verbose_info: bool) -> Self {
        Self::with_template(DiagnosticTemplate::Plain, verbose_info)
    }

    pub fn render(&self, diagnostic: &Diagnostic, context: &str) -> Option<Vec<String>> {
        let ctx = DiagnosticRenderContext {
            context: diagnostic.source_context.as_deref().unwrap_or(context),
            verbose_info: self.verbose_info,
        };
        self.template.render(diagnostic, &ctx)
    }
}

impl Default for DiagnosticDisplayOptions {
    fn default() -> Self {
        DiagnosticDisplayOptions::pretty(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone)]
pub struct Diagnostic<T = String>
where
    T: Clone + Display,
{
    pub level: DiagnosticLevel,
    pub message: T,
    pub pos: Option<SourcePos>,
    pub suggestions: Vec<String>,
    pub source_context: Option<String>,
    pub code: Option<String>,
}

impl<T> Diagnostic<T>
where
    T: Clone + Display,
{
    fn with_level(level: DiagnosticLevel, message: T) -> Self {
        Self {
            level,
            message,
            pos: None,
            suggestions: Vec::new(),
            source_context: None,
            code: None,
        }
    }

    pub fn error(message: T) -> Self {
        Self::with_level(DiagnosticLevel::Error, message)
    }

    pub fn warning(message: T) -> Self {
        Self::with_level(DiagnosticLevel::Warning, message)
    }

    pub fn info(message: T) -> Self {
        Self::with_level(DiagnosticLevel::Info, message)
    }

    pub fn with_pos(mut self, pos: SourcePos) -> Self {
        if !pos.is_unknown() {
            self.pos = Some(pos);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_source_context(mut self, context: impl Into<String>) -> Self {
        self.source_context = Some(context.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }

    pub fn as_string_diagnostic(&self) -> Diagnostic<String> {
        Diagnostic {
            level: self.level,
            message: self.message.to_string(),
            pos: self.pos.clone(),
            suggestions: self.suggestions.clone(),
            source_context: self.source_context.clone(),
            code: self.code.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Diagnostic<T>
where
    T: Clone + Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostic")
            .field("level", &self.level)
            .field("message", &self.message.to_string())
            .field("pos", &self.pos)
            .field("suggestions", &self.suggestions)
            .field("source_context", &self.source_context)
            .field("code", &self.code)
            .finish()
    }
}

impl<T> Display for Diagnostic<T>
where
    T: Clone + Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }

        if !self.suggestions.is_empty() {
            let hints = self.suggestions.join("; ");
            write!(f, " (hints: {})", hints)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticReport<T, M = String>
where
    M: Clone + Display,
{
    pub value: Option<T>,
    pub diagnostics: Vec<Diagnostic<M>>,
}

impl<T, M> DiagnosticReport<T, M>
where
    M: Clone + Display,
{
    pub fn success(value: T) -> Self {
        Self {
            value: Some(value),
            diagnostics: Vec::new(),
        }
    }

    pub fn success_with_diagnostics(value: T, diagnostics: Vec<Diagnostic<M>>) -> Self {
        Self {
            value: Some(value),
            diagnostics,
        }
    }

    pub fn failure(diagnostics: Vec<Diagnostic<M>>) -> Self {
        Self {
            value: None,
            diagnostics,
        }
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|diag| diag.level == DiagnosticLevel::Error)
            .count()
    }

    pub fn into_result(self) -> Result<(T, Vec<Diagnostic<M>>), Vec<Diagnostic<M>>> {
        match self.value {
            Some(value) => Ok((value, self.diagnostics)),
            None => Err(self.diagnostics),
        }
    }
}

/// Collects diagnostics for one build. Handles are cheap to clone and all
/// clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticManager {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self, diagnostic: Diagnostic) {
        self.add_diagnostic(Diagnostic {
            level: DiagnosticLevel::Error,
            ..diagnostic
        });
    }

    pub fn warning(&self, diagnostic: Diagnostic) {
        self.add_diagnostic(Diagnostic {
            level: DiagnosticLevel::Warning,
            ..diagnostic
        });
    }

    pub fn add_diagnostic(&self, diagnostic: Diagnostic) {
        match diagnostic.level {
            DiagnosticLevel::Error => tracing::debug!("recorded error: {}", diagnostic),
            DiagnosticLevel::Warning => tracing::debug!("recorded warning: {}", diagnostic),
            DiagnosticLevel::Info => {}
        }
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.push(diagnostic);
        }
    }

    pub fn add_diagnostics(&self, new_diagnostics: Vec<Diagnostic>) {
        for diagnostic in new_diagnostics {
            self.add_diagnostic(diagnostic);
        }
    }

    pub fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.count(DiagnosticLevel::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(DiagnosticLevel::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.diagnostics
            .lock()
            .map(|d| d.iter().filter(|diag| diag.level == level).count())
            .unwrap_or(0)
    }

    /// Renders every diagnostic with the given template. The fallback context
    /// is used when a diagnostic does not specify a source context.
    pub fn render<M>(
        diagnostics: &[Diagnostic<M>],
        fallback_context: Option<&str>,
        options: &DiagnosticDisplayOptions,
    ) -> Vec<String>
    where
        M: Clone + Display,
    {
        let mut out = Vec::new();
        for diagnostic in diagnostics {
            let printable = diagnostic.as_string_diagnostic();
            if let Some(lines) = options.render(&printable, fallback_context.unwrap_or("lanec")) {
                out.extend(lines);
            }
        }
        out
    }

    /// Emit diagnostics to stderr using the provided template and options.
    pub fn emit<M>(
        diagnostics: &[Diagnostic<M>],
        fallback_context: Option<&str>,
        options: &DiagnosticDisplayOptions,
    ) where
        M: Clone + Display,
    {
        for line in Self::render(diagnostics, fallback_context, options) {
            eprintln!("{}", line);
        }
    }
}

fn render_pretty<M>(
    diagnostic: &Diagnostic<M>,
    ctx: &DiagnosticRenderContext<'_>,
) -> Option<Vec<String>>
where
    M: Clone + Display,
{
    if matches!(diagnostic.level, DiagnosticLevel::Info) && !ctx.verbose_info {
        return None;
    }

    let prefix = match diagnostic.level {
        DiagnosticLevel::Error => "❌",
        DiagnosticLevel::Warning => "⚠️ ",
        DiagnosticLevel::Info => "ℹ️ ",
    };

    let header = match diagnostic.code.as_ref() {
        Some(code) => format!(
            "{} [{}] {} ({})",
            prefix, ctx.context, diagnostic.message, code
        ),
        None => format!("{} [{}] {}", prefix, ctx.context, diagnostic.message),
    };

    let mut lines = vec![header];

    if let Some(pos) = &diagnostic.pos {
        lines.push(format!("   at {}", pos));
    }

    for suggestion in &diagnostic.suggestions {
        lines.push(format!("   💡 {}", suggestion));
    }

    Some(lines)
}

fn render_plain<M>(
    diagnostic: &Diagnostic<M>,
    ctx: &DiagnosticRenderContext<'_>,
) -> Option<Vec<String>>
where
    M: Clone + Display,
{
    if matches!(diagnostic.level, DiagnosticLevel::Info) && !ctx.verbose_info {
        return None;
    }

    let level = match diagnostic.level {
        DiagnosticLevel::Error => "Error",
        DiagnosticLevel::Warning => "Warning",
        DiagnosticLevel::Info => "Info",
    };

    let location = diagnostic
        .pos
        .as_ref()
        .map(|pos| format!("{}: ", pos))
        .unwrap_or_default();

    let header = match diagnostic.code.as_ref() {
        Some(code) => format!(
            "{}{}: {} ({}) [{}]",
            location, level, diagnostic.message, code, ctx.context
        ),
        None => format!(
            "{}{}: {} [{}]",
            location, level, diagnostic.message, ctx.context
        ),
    };

    let mut lines = vec![header];

    for suggestion in &diagnostic.suggestions {
        lines.push(format!("   suggestion: {}", suggestion));
    }

    Some(lines)
}

#[macro_export]
macro_rules! diagnostic_error {
    ($context:expr, $($arg:tt)*) => {
        $crate::diagnostics::DiagnosticReport::failure(
            vec![$crate::diagnostics::Diagnostic::error(format!($($arg)*))
                .with_source_context($context)],
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_counts_by_level() {
        let manager = DiagnosticManager::new();
        let shared = manager.clone();
        shared.error(Diagnostic::info("bad".to_string()));
        manager.warning(Diagnostic::error("odd".to_string()));
        manager.add_diagnostic(Diagnostic::info("note".to_string()));

        assert_eq!(manager.error_count(), 1);
        assert_eq!(manager.warning_count(), 1);
        assert!(shared.has_errors());
        assert_eq!(manager.get_diagnostics().len(), 3);
    }

    #[test]
    fn plain_template_puts_location_first() {
        let diagnostic = Diagnostic::warning("suspicious suffix".to_string())
            .with_pos(SourcePos::new("a.lc", 3, 7))
            .with_suggestion("rename the file");
        let lines = DiagnosticDisplayOptions::plain(false)
            .render(&diagnostic, "emit")
            .unwrap();
        assert_eq!(lines[0], "a.lc:3:7: Warning: suspicious suffix [emit]");
        assert_eq!(lines[1], "   suggestion: rename the file");
    }

    #[test]
    fn info_is_hidden_unless_verbose() {
        let diagnostic = Diagnostic::info("compiling".to_string());
        assert!(DiagnosticDisplayOptions::pretty(false)
            .render(&diagnostic, "driver")
            .is_none());
        assert!(DiagnosticDisplayOptions::pretty(true)
            .render(&diagnostic, "driver")
            .is_some());
    }

    #[test]
    fn report_macro_builds_failure() {
        let report: DiagnosticReport<()> = diagnostic_error!("snapshot", "missing {}", "field");
        assert_eq!(report.error_count(), 1);
        let diagnostics = report.into_result().unwrap_err();
        assert_eq!(diagnostics[0].message, "missing field");
        assert_eq!(diagnostics[0].source_context.as_deref(), Some("snapshot"));
    }
}
