use std::fmt::{self, Formatter};

/// Configuration for pretty-printing intermediate representations.
#[derive(Debug, Clone)]
pub struct PrettyOptions {
    /// Number of spaces to indent per nesting level.
    pub indent_size: usize,
    /// Print the module id, data layout and triple lines before the body.
    pub show_module_header: bool,
}

impl Default for PrettyOptions {
    fn default() -> Self {
        Self {
            indent_size: 2,
            show_module_header: true,
        }
    }
}

/// Formatting context shared across pretty printers.
pub struct PrettyCtx<'a> {
    pub options: &'a PrettyOptions,
    indent: usize,
}

impl<'a> PrettyCtx<'a> {
    pub fn new(options: &'a PrettyOptions) -> Self {
        Self { options, indent: 0 }
    }

    pub fn write_indent(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for _ in 0..self.indent {
            write!(f, " ")?;
        }
        Ok(())
    }

    pub fn writeln(&self, f: &mut Formatter<'_>, line: impl AsRef<str>) -> fmt::Result {
        self.write_indent(f)?;
        writeln!(f, "{}", line.as_ref())
    }

    pub fn increase_indent(&mut self) {
        self.indent += self.options.indent_size;
    }

    pub fn decrease_indent(&mut self) {
        self.indent = self.indent.saturating_sub(self.options.indent_size);
    }

    pub fn with_indent<F>(&mut self, mut f_closure: F) -> fmt::Result
    where
        F: FnMut(&mut Self) -> fmt::Result,
    {
        self.increase_indent();
        let result = f_closure(self);
        self.decrease_indent();
        result
    }
}

/// Trait implemented by IR nodes that support pretty-printing.
pub trait PrettyPrintable {
    fn fmt_pretty(&self, f: &mut Formatter<'_>, ctx: &mut PrettyCtx<'_>) -> fmt::Result;
}

/// Helper wrapper implementing `Display` by delegating to `PrettyPrintable`.
pub struct PrettyDisplay<'a, T> {
    value: &'a T,
    options: PrettyOptions,
}

impl<'a, T> PrettyDisplay<'a, T> {
    pub fn new(value: &'a T, options: PrettyOptions) -> Self {
        Self { value, options }
    }
}

impl<'a, T> fmt::Display for PrettyDisplay<'a, T>
where
    T: PrettyPrintable,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut ctx = PrettyCtx::new(&self.options);
        self.value.fmt_pretty(f, &mut ctx)
    }
}

/// Convenience helper to build a `PrettyDisplay` wrapper.
pub fn pretty<'a, T>(value: &'a T, options: PrettyOptions) -> PrettyDisplay<'a, T>
where
    T: PrettyPrintable,
{
    PrettyDisplay::new(value, options)
}

/// Escapes a string for a double-quoted IR literal. Non-printable bytes use
/// the `\XX` hex form.
pub fn escape_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'"' => out.push_str("\\22"),
            b'\\' => out.push_str("\\5C"),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                use std::fmt::Write as _;
                let _ = write!(out, "\\{:02X}", byte);
            }
        }
    }
    out
}
