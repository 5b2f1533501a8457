use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepsFormat {
    /// One path per line.
    Flat,
    /// `target: source dep...` with line continuations. The source is
    /// absent when the program came from stdin.
    MakeRule {
        target: String,
        source: Option<String>,
    },
}

/// Renders the dependency list. Paths arrive escaped the way the
/// preprocessor reports them.
pub fn render_deps(dependencies: &BTreeSet<String>, format: &DepsFormat) -> String {
    match format {
        DepsFormat::Flat => dependencies
            .iter()
            .map(|dep| format!("{}\n", unescape_path(dep)))
            .collect(),
        DepsFormat::MakeRule { target, source } => {
            let mut entries = Vec::new();
            // rules list the source first
            if let Some(source) = source {
                entries.push(source.clone());
            }
            for dep in dependencies {
                let dep = unescape_path(dep);
                if source.as_deref() == Some(dep.as_str()) {
                    continue;
                }
                entries.push(dep);
            }
            let mut rule = format!("{}:", target);
            for (index, entry) in entries.iter().enumerate() {
                if index > 0 {
                    rule.push_str(" \\\n");
                }
                rule.push(' ');
                rule.push_str(entry);
            }
            rule.push('\n');
            rule
        }
    }
}

/// Resolves the simple C escapes; paths never carry octal, hex or unicode
/// escapes.
pub fn unescape_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let replacement = match chars.peek() {
            Some('\'') => '\'',
            Some('?') => '?',
            Some('\\') => '\\',
            Some('a') => '\u{7}',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('v') => '\u{b}',
            _ => {
                out.push(c);
                continue;
            }
        };
        chars.next();
        out.push(replacement);
    }
    out
}
