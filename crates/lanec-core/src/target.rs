//! Target descriptors.
//!
//! A [`Target`] names one ISA variant together with the vector width and mask
//! representation code is generated for. ISAs are totally ordered by hardware
//! capability; that order is the priority order runtime dispatch walks.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Unknown target \"{name}\". Valid targets: {valid}")]
    UnknownTarget { name: String, valid: String },
    #[error("Unknown architecture \"{0}\". Valid architectures: x86, x86-64")]
    UnknownArch(String),
    #[error("Unknown cpu \"{name}\". Valid cpus: {valid}")]
    UnknownCpu { name: String, valid: String },
    #[error("Target \"{target}\" requires an ISA that cpu \"{cpu}\" does not support")]
    UnsupportedByCpu { target: String, cpu: String },
}

/// Instruction-set variants, declared in increasing capability order. The
/// derived `Ord` is the dispatch priority order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Isa {
    Generic,
    Sse2,
    Sse4,
    Avx,
    Avx11,
    Avx2,
    Avx512Knl,
    Avx512Skx,
}

impl Isa {
    /// Numeric capability rank, shared with the runtime detection routine.
    pub fn rank(self) -> i32 {
        match self {
            Isa::Generic => lanec_rt::ISA_GENERIC,
            Isa::Sse2 => lanec_rt::ISA_SSE2,
            Isa::Sse4 => lanec_rt::ISA_SSE4,
            Isa::Avx => lanec_rt::ISA_AVX,
            Isa::Avx11 => lanec_rt::ISA_AVX11,
            Isa::Avx2 => lanec_rt::ISA_AVX2,
            Isa::Avx512Knl => lanec_rt::ISA_AVX512KNL,
            Isa::Avx512Skx => lanec_rt::ISA_AVX512SKX,
        }
    }

    pub fn from_rank(rank: i32) -> Option<Isa> {
        Isa::iter().find(|isa| isa.rank() == rank)
    }

    /// Short name used for artifact suffixes and symbol mangling.
    pub fn short_name(self) -> &'static str {
        match self {
            Isa::Generic => "generic",
            Isa::Sse2 => "sse2",
            Isa::Sse4 => "sse4",
            Isa::Avx => "avx",
            Isa::Avx11 => "avx11",
            Isa::Avx2 => "avx2",
            Isa::Avx512Knl => "avx512knl",
            Isa::Avx512Skx => "avx512skx",
        }
    }

    /// Name of the target used when only the ISA is known.
    pub fn default_target_name(self) -> &'static str {
        match self {
            Isa::Generic => "generic-4",
            Isa::Sse2 => "sse2-i32x4",
            Isa::Sse4 => "sse4-i32x4",
            Isa::Avx => "avx1-i32x8",
            Isa::Avx11 => "avx1.1-i32x8",
            Isa::Avx2 => "avx2-i32x8",
            Isa::Avx512Knl => "avx512knl-i32x16",
            Isa::Avx512Skx => "avx512skx-i32x16",
        }
    }

    pub fn default_cpu(self) -> Cpu {
        match self {
            Isa::Generic => Cpu::Generic,
            Isa::Sse2 => Cpu::Core2,
            Isa::Sse4 => Cpu::CoreI7,
            Isa::Avx => Cpu::CoreI7Avx,
            Isa::Avx11 => Cpu::CoreAvxI,
            Isa::Avx2 => Cpu::CoreAvx2,
            Isa::Avx512Knl => Cpu::Knl,
            Isa::Avx512Skx => Cpu::Skx,
        }
    }

    pub fn capabilities(self) -> BTreeSet<Capability> {
        use Capability::*;
        let list: &[Capability] = match self {
            Isa::Generic => &[MaskingIsFree, Trigonometry],
            Isa::Sse2 | Isa::Sse4 | Isa::Avx => &[],
            Isa::Avx11 => &[HalfConversion, Rand],
            Isa::Avx2 => &[HalfConversion, Rand, Gather],
            Isa::Avx512Knl => &[
                HalfConversion,
                Rand,
                Gather,
                Scatter,
                Transcendentals,
                Rsqrtd,
                Rcpd,
                VecPrefetch,
                MaskingIsFree,
            ],
            Isa::Avx512Skx => &[
                HalfConversion,
                Rand,
                Gather,
                Scatter,
                Rsqrtd,
                Rcpd,
                VecPrefetch,
                MaskingIsFree,
            ],
        };
        list.iter().copied().collect()
    }

    /// Best ISA of the machine running the compiler, if it is an x86 one.
    pub fn host() -> Option<Isa> {
        match Isa::from_rank(lanec_rt::system_isa()) {
            Some(Isa::Generic) | None => None,
            some => some,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Display, AsRefStr,
)]
pub enum Capability {
    HalfConversion,
    Rand,
    Gather,
    Scatter,
    Transcendentals,
    Trigonometry,
    Rsqrtd,
    Rcpd,
    VecPrefetch,
    MaskingIsFree,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIter, EnumString, Display, AsRefStr,
)]
pub enum Arch {
    #[strum(serialize = "x86")]
    X86,
    #[default]
    #[strum(to_string = "x86-64", serialize = "x86_64")]
    X86_64,
}

impl Arch {
    pub fn pointer_bits(self) -> u32 {
        match self {
            Arch::X86 => 32,
            Arch::X86_64 => 64,
        }
    }

    pub fn triple(self) -> String {
        let cpu = match self {
            Arch::X86 => "i686",
            Arch::X86_64 => "x86_64",
        };
        let os = if cfg!(target_os = "windows") {
            "pc-windows-msvc"
        } else if cfg!(target_os = "macos") {
            "apple-macosx"
        } else {
            "unknown-linux-gnu"
        };
        format!("{}-{}", cpu, os)
    }

    pub fn data_layout(self) -> &'static str {
        match self {
            Arch::X86 => "e-m:e-p:32:32-i64:64-f80:32-n8:16:32-S128",
            Arch::X86_64 => "e-m:e-i64:64-f80:128-n8:16:32:64-S128",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display, AsRefStr)]
pub enum Cpu {
    #[strum(serialize = "generic")]
    Generic,
    #[strum(serialize = "core2")]
    Core2,
    #[strum(serialize = "penryn")]
    Penryn,
    #[strum(to_string = "corei7", serialize = "nehalem")]
    CoreI7,
    #[strum(to_string = "corei7-avx", serialize = "sandybridge")]
    CoreI7Avx,
    #[strum(to_string = "core-avx-i", serialize = "ivybridge")]
    CoreAvxI,
    #[strum(to_string = "core-avx2", serialize = "haswell")]
    CoreAvx2,
    #[strum(serialize = "broadwell")]
    Broadwell,
    #[strum(serialize = "skylake")]
    Skylake,
    #[strum(serialize = "knl")]
    Knl,
    #[strum(serialize = "skx")]
    Skx,
}

impl Cpu {
    /// Most capable ISA the cpu can execute.
    pub fn best_isa(self) -> Isa {
        match self {
            Cpu::Generic | Cpu::Core2 => Isa::Sse2,
            Cpu::Penryn | Cpu::CoreI7 => Isa::Sse4,
            Cpu::CoreI7Avx => Isa::Avx,
            Cpu::CoreAvxI => Isa::Avx11,
            Cpu::CoreAvx2 | Cpu::Broadwell | Cpu::Skylake => Isa::Avx2,
            Cpu::Knl => Isa::Avx512Knl,
            Cpu::Skx => Isa::Avx512Skx,
        }
    }

    fn valid_names() -> String {
        Cpu::iter().map(|cpu| cpu.to_string()).join(", ")
    }
}

struct TargetEntry {
    names: &'static [&'static str],
    isa: Isa,
    vector_width: u32,
    mask_bits: u32,
}

const fn entry(
    names: &'static [&'static str],
    isa: Isa,
    vector_width: u32,
    mask_bits: u32,
) -> TargetEntry {
    TargetEntry {
        names,
        isa,
        vector_width,
        mask_bits,
    }
}

/// Every accepted target name. The first name of each entry is canonical.
const TARGETS: &[TargetEntry] = &[
    entry(&["sse2-i32x4", "sse2"], Isa::Sse2, 4, 32),
    entry(&["sse2-i32x8", "sse2-x2"], Isa::Sse2, 8, 32),
    entry(&["sse4-i32x4", "sse4"], Isa::Sse4, 4, 32),
    entry(&["sse4-i32x8", "sse4-x2"], Isa::Sse4, 8, 32),
    entry(&["sse4-i8x16"], Isa::Sse4, 16, 8),
    entry(&["sse4-i16x8"], Isa::Sse4, 8, 16),
    entry(&["avx1-i32x4"], Isa::Avx, 4, 32),
    entry(&["avx1-i32x8", "avx", "avx1"], Isa::Avx, 8, 32),
    entry(&["avx1-i32x16", "avx-x2", "avx1-x2"], Isa::Avx, 16, 32),
    entry(&["avx1-i64x4"], Isa::Avx, 4, 64),
    entry(&["avx1.1-i32x8", "avx1.1"], Isa::Avx11, 8, 32),
    entry(&["avx1.1-i32x16", "avx1.1-x2"], Isa::Avx11, 16, 32),
    entry(&["avx1.1-i64x4"], Isa::Avx11, 4, 64),
    entry(&["avx2-i32x8", "avx2"], Isa::Avx2, 8, 32),
    entry(&["avx2-i32x16", "avx2-x2"], Isa::Avx2, 16, 32),
    entry(&["avx2-i64x4"], Isa::Avx2, 4, 64),
    entry(&["avx512knl-i32x16"], Isa::Avx512Knl, 16, 1),
    entry(&["avx512skx-i32x16"], Isa::Avx512Skx, 16, 1),
    entry(&["generic-1"], Isa::Generic, 1, 1),
    entry(&["generic-4"], Isa::Generic, 4, 1),
    entry(&["generic-8"], Isa::Generic, 8, 1),
    entry(&["generic-16"], Isa::Generic, 16, 1),
    entry(&["generic-32"], Isa::Generic, 32, 1),
    entry(&["generic-64"], Isa::Generic, 64, 1),
];

/// One row of the target table, as listed by `lanec targets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub isa: Isa,
    pub vector_width: u32,
    pub mask_bits: u32,
}

pub fn known_targets() -> Vec<TargetInfo> {
    TARGETS
        .iter()
        .map(|entry| TargetInfo {
            name: entry.names[0],
            aliases: &entry.names[1..],
            isa: entry.isa,
            vector_width: entry.vector_width,
            mask_bits: entry.mask_bits,
        })
        .collect()
}

fn valid_target_names() -> String {
    TARGETS.iter().flat_map(|entry| entry.names.iter()).join(", ")
}

/// Immutable description of one compilation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: String,
    isa: Isa,
    arch: Arch,
    cpu: Cpu,
    vector_width: u32,
    mask_bits: u32,
    pic: bool,
    capabilities: BTreeSet<Capability>,
}

impl Target {
    /// Resolves a target from optional arch, cpu and target names.
    ///
    /// With no target name the ISA follows the cpu, or the host when no cpu
    /// is given either.
    pub fn new(
        arch: Option<&str>,
        cpu: Option<&str>,
        name: Option<&str>,
        pic: bool,
    ) -> Result<Self, TargetError> {
        let arch = match arch {
            Some(arch) => {
                Arch::from_str(arch).map_err(|_| TargetError::UnknownArch(arch.to_string()))?
            }
            None => Arch::default(),
        };
        let cpu = cpu
            .map(|cpu| {
                Cpu::from_str(cpu).map_err(|_| TargetError::UnknownCpu {
                    name: cpu.to_string(),
                    valid: Cpu::valid_names(),
                })
            })
            .transpose()?;

        let name = match (name, cpu) {
            (Some(name), _) => name.trim().to_string(),
            (None, Some(cpu)) => cpu.best_isa().default_target_name().to_string(),
            (None, None) => Self::host_default_name().to_string(),
        };
        let entry = TARGETS
            .iter()
            .find(|entry| entry.names.contains(&name.as_str()))
            .ok_or_else(|| TargetError::UnknownTarget {
                name: name.clone(),
                valid: valid_target_names(),
            })?;

        let cpu = match cpu {
            Some(cpu) if entry.isa != Isa::Generic && cpu.best_isa() < entry.isa => {
                return Err(TargetError::UnsupportedByCpu {
                    target: name,
                    cpu: cpu.to_string(),
                });
            }
            Some(cpu) => cpu,
            None => entry.isa.default_cpu(),
        };

        Ok(Self {
            name: entry.names[0].to_string(),
            isa: entry.isa,
            arch,
            cpu,
            vector_width: entry.vector_width,
            mask_bits: entry.mask_bits,
            pic,
            capabilities: entry.isa.capabilities(),
        })
    }

    /// Builds the canonical target for an ISA, used for the dispatch module.
    pub fn for_isa(isa: Isa, arch: Arch, pic: bool) -> Self {
        let entry = TARGETS
            .iter()
            .find(|entry| entry.names[0] == isa.default_target_name())
            .unwrap_or(&TARGETS[0]);
        Self {
            name: entry.names[0].to_string(),
            isa,
            arch,
            cpu: isa.default_cpu(),
            vector_width: entry.vector_width,
            mask_bits: entry.mask_bits,
            pic,
            capabilities: isa.capabilities(),
        }
    }

    /// Target picked when none is requested: the host's best ISA, or sse2 on
    /// hosts without an x86 ISA.
    pub fn host_default_name() -> &'static str {
        Isa::host()
            .unwrap_or(Isa::Sse2)
            .default_target_name()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn isa(&self) -> Isa {
        self.isa
    }

    pub fn isa_name(&self) -> &'static str {
        self.isa.short_name()
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn cpu(&self) -> Cpu {
        self.cpu
    }

    pub fn vector_width(&self) -> u32 {
        self.vector_width
    }

    pub fn mask_bits(&self) -> u32 {
        self.mask_bits
    }

    pub fn pointer_bits(&self) -> u32 {
        self.arch.pointer_bits()
    }

    pub fn pic(&self) -> bool {
        self.pic
    }

    pub fn is_generic(&self) -> bool {
        self.isa == Isa::Generic
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn triple(&self) -> String {
        self.arch.triple()
    }

    pub fn data_layout(&self) -> &'static str {
        self.arch.data_layout()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (isa {}, arch {}, cpu {}, width {})",
            self.name, self.isa, self.arch, self.cpu, self.vector_width
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isa_order_matches_runtime_ranks() {
        let ranks = Isa::iter().map(Isa::rank).collect::<Vec<_>>();
        assert_eq!(ranks, (0..8).collect::<Vec<_>>());
        assert!(Isa::Sse2 < Isa::Avx2);
        assert!(Isa::Avx512Knl < Isa::Avx512Skx);
        for isa in Isa::iter() {
            assert_eq!(Isa::from_rank(isa.rank()), Some(isa));
        }
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let target = Target::new(None, None, Some("avx2"), false).unwrap();
        assert_eq!(target.name(), "avx2-i32x8");
        assert_eq!(target.isa(), Isa::Avx2);
        assert_eq!(target.vector_width(), 8);
        assert_eq!(target.isa_name(), "avx2");
        assert!(target.has(Capability::Gather));

        let target = Target::new(None, None, Some("sse4-x2"), false).unwrap();
        assert_eq!(target.name(), "sse4-i32x8");
        assert_eq!(target.vector_width(), 8);

        let target = Target::new(None, None, Some("avx1.1"), false).unwrap();
        assert_eq!(target.isa(), Isa::Avx11);
        assert_eq!(target.isa_name(), "avx11");
    }

    #[test]
    fn unknown_names_list_valid_targets() {
        let err = Target::new(None, None, Some("neon"), false).unwrap_err();
        let TargetError::UnknownTarget { name, valid } = err else {
            panic!("unexpected error");
        };
        assert_eq!(name, "neon");
        assert!(valid.contains("sse2-i32x4"));
        assert!(valid.contains("generic-16"));
    }

    #[test]
    fn arch_controls_pointer_width() {
        let target = Target::new(Some("x86"), None, Some("sse2"), true).unwrap();
        assert_eq!(target.pointer_bits(), 32);
        assert!(target.triple().starts_with("i686-"));
        assert!(target.pic());
        let target = Target::new(Some("x86_64"), None, Some("sse2"), false).unwrap();
        assert_eq!(target.pointer_bits(), 64);
        assert!(matches!(
            Target::new(Some("arm"), None, Some("sse2"), false),
            Err(TargetError::UnknownArch(_))
        ));
    }

    #[test]
    fn cpu_selects_and_limits_isa() {
        let target = Target::new(None, Some("haswell"), None, false).unwrap();
        assert_eq!(target.isa(), Isa::Avx2);
        assert_eq!(target.cpu(), Cpu::CoreAvx2);

        let err = Target::new(None, Some("core2"), Some("avx2"), false).unwrap_err();
        assert!(matches!(err, TargetError::UnsupportedByCpu { .. }));

        // generic targets run anywhere
        assert!(Target::new(None, Some("core2"), Some("generic-4"), false).is_ok());
    }

    #[test]
    fn default_target_is_a_known_x86_target() {
        let target = Target::new(None, None, None, false).unwrap();
        assert!(target.isa() >= Isa::Sse2);
    }

    #[test]
    fn target_for_isa_uses_canonical_entry() {
        let target = Target::for_isa(Isa::Sse4, Arch::X86_64, false);
        assert_eq!(target.name(), "sse4-i32x4");
        assert_eq!(target.vector_width(), 4);
        assert_eq!(target.cpu(), Cpu::CoreI7);
    }

    #[test]
    fn known_targets_cover_every_isa() {
        let targets = known_targets();
        for isa in Isa::iter() {
            assert!(targets.iter().any(|info| info.isa == isa));
        }
        let avx = targets.iter().find(|info| info.name == "avx1-i32x8").unwrap();
        assert_eq!(avx.aliases, &["avx", "avx1"]);
    }
}
