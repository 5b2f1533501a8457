use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Kind of file a build writes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum OutputType {
    Asm,
    Bitcode,
    BitcodeText,
    Object,
    #[strum(serialize = "c++")]
    #[serde(rename = "c++")]
    Cxx,
    Header,
    Deps,
    HostStub,
    DevStub,
}

impl OutputType {
    /// Human readable name used in messages.
    pub fn description(self) -> &'static str {
        match self {
            OutputType::Asm => "assembly",
            OutputType::Bitcode => "LLVM bitcode",
            OutputType::BitcodeText => "LLVM assembly",
            OutputType::Object => "object",
            OutputType::Cxx => "c++",
            OutputType::Header => "header",
            OutputType::Deps => "dependencies",
            OutputType::HostStub => "host-side offload stub",
            OutputType::DevStub => "dev-side offload stub",
        }
    }

    /// File suffixes expected for this kind, lowercase and without the dot.
    /// Empty when any name is fine.
    pub fn expected_suffixes(self) -> &'static [&'static str] {
        const CXX: &[&str] = &["c", "cc", "c++", "cxx", "cpp"];
        match self {
            OutputType::Asm => &["s"],
            OutputType::Bitcode => &["bc"],
            OutputType::BitcodeText => &["ll"],
            OutputType::Object => &["o", "obj"],
            OutputType::Cxx | OutputType::HostStub | OutputType::DevStub => CXX,
            OutputType::Header => &["h", "hh", "hpp"],
            OutputType::Deps => &[],
        }
    }

    /// Whether the code generation backend produces this kind from a module.
    pub fn is_code(self) -> bool {
        matches!(
            self,
            OutputType::Asm
                | OutputType::Bitcode
                | OutputType::BitcodeText
                | OutputType::Object
                | OutputType::Cxx
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFlags {
    /// Generate position independent code.
    pub pic: bool,
    /// Guard headers with `#pragma once` rather than an include guard.
    pub pragma_once: bool,
    /// Write dependencies as a Make rule.
    pub make_rule_deps: bool,
    /// Write dependencies as a flat list.
    pub flat_deps: bool,
    /// Write dependencies to stdout.
    pub deps_to_stdout: bool,
    /// Declare the instrumentation hook in generated headers.
    pub instrument: bool,
}

impl Default for OutputFlags {
    fn default() -> Self {
        Self {
            pic: false,
            pragma_once: true,
            make_rule_deps: false,
            flat_deps: false,
            deps_to_stdout: false,
            instrument: false,
        }
    }
}

impl OutputFlags {
    pub fn wants_deps(&self) -> bool {
        self.make_rule_deps || self.flat_deps || self.deps_to_stdout
    }
}

/// Everything one invocation of the compiler asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    /// Program to compile; `None` reads stdin.
    pub source: Option<PathBuf>,
    pub arch: Option<String>,
    pub cpu: Option<String>,
    /// Comma separated target names; `None` picks the host default.
    pub targets: Option<String>,
    pub flags: OutputFlags,
    pub output_type: OutputType,
    pub out_file: Option<PathBuf>,
    pub header_file: Option<PathBuf>,
    /// Header included by C++ output.
    pub include_file: Option<PathBuf>,
    pub deps_file: Option<PathBuf>,
    /// Target name of the Make rule.
    pub deps_target: Option<String>,
    pub host_stub_file: Option<PathBuf>,
    pub dev_stub_file: Option<PathBuf>,
}

impl BuildRequest {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self {
            source,
            arch: None,
            cpu: None,
            targets: None,
            flags: OutputFlags::default(),
            output_type: OutputType::Object,
            out_file: None,
            header_file: None,
            include_file: None,
            deps_file: None,
            deps_target: None,
            host_stub_file: None,
            dev_stub_file: None,
        }
    }

    pub fn reads_stdin(&self) -> bool {
        match &self.source {
            None => true,
            Some(path) => path == Path::new("-"),
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        if self.reads_stdin() {
            None
        } else {
            self.source.as_deref()
        }
    }

    pub fn writes_stdout(&self) -> bool {
        self.out_file.as_deref() == Some(Path::new("-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn output_types_parse_from_their_names() {
        assert_eq!(OutputType::from_str("bitcode-text"), Ok(OutputType::BitcodeText));
        assert_eq!(OutputType::from_str("c++"), Ok(OutputType::Cxx));
        assert_eq!(OutputType::Object.to_string(), "object");
        assert!(OutputType::Object.is_code());
        assert!(!OutputType::Header.is_code());
    }

    #[test]
    fn dash_means_standard_streams() {
        let mut request = BuildRequest::new(Some(PathBuf::from("-")));
        assert!(request.reads_stdin());
        assert!(request.source_path().is_none());
        request.out_file = Some(PathBuf::from("-"));
        assert!(request.writes_stdout());

        let request = BuildRequest::new(Some(PathBuf::from("scale.json")));
        assert_eq!(request.source_path(), Some(Path::new("scale.json")));
    }
}
