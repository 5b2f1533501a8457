//! Runtime support for programs compiled by lanec.
//!
//! Every dispatch function emitted for a multi-target build calls
//! `__set_system_isa` on entry, which asks [`__get_system_isa`] for the rank
//! of the most capable ISA the executing machine supports. The rank values
//! below are the capability order used by the compiler when it builds the
//! dispatch cascade, so they must stay in sync with `lanec_core::target::Isa`.

use std::sync::atomic::{AtomicI32, Ordering};

pub const ISA_GENERIC: i32 = 0;
pub const ISA_SSE2: i32 = 1;
pub const ISA_SSE4: i32 = 2;
pub const ISA_AVX: i32 = 3;
pub const ISA_AVX11: i32 = 4;
pub const ISA_AVX2: i32 = 5;
pub const ISA_AVX512KNL: i32 = 6;
pub const ISA_AVX512SKX: i32 = 7;

const UNSET: i32 = -1;

static SYSTEM_ISA: AtomicI32 = AtomicI32::new(UNSET);

/// Rank of the best ISA supported by the executing machine.
///
/// Detection runs on the first call and the result is cached for the life of
/// the process. Two threads racing through the first call both store the same
/// value, so no lock is taken.
pub fn system_isa() -> i32 {
    let cached = SYSTEM_ISA.load(Ordering::Relaxed);
    if cached != UNSET {
        return cached;
    }
    let detected = detect();
    SYSTEM_ISA.store(detected, Ordering::Relaxed);
    detected
}

/// C entry point called from `__set_system_isa` in the dispatch module.
#[no_mangle]
pub extern "C" fn __get_system_isa() -> i32 {
    system_isa()
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect() -> i32 {
    if is_x86_feature_detected!("avx") {
        if !(is_x86_feature_detected!("f16c") && is_x86_feature_detected!("rdrand")) {
            return ISA_AVX;
        }
        if !is_x86_feature_detected!("avx2") {
            return ISA_AVX11;
        }
        if is_x86_feature_detected!("avx512f") {
            let skx = is_x86_feature_detected!("avx512dq")
                && is_x86_feature_detected!("avx512cd")
                && is_x86_feature_detected!("avx512bw")
                && is_x86_feature_detected!("avx512vl");
            if skx {
                return ISA_AVX512SKX;
            }
            if is_x86_feature_detected!("avx512cd") && knl_extensions() {
                return ISA_AVX512KNL;
            }
        }
        return ISA_AVX2;
    }
    if is_x86_feature_detected!("sse4.1") {
        return ISA_SSE4;
    }
    if is_x86_feature_detected!("sse2") {
        return ISA_SSE2;
    }
    ISA_GENERIC
}

/// AVX-512 exponential/reciprocal (ER) and prefetch (PF) extensions, only
/// shipped on Xeon Phi parts.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[allow(unused_unsafe)]
fn knl_extensions() -> bool {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::__cpuid_count;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::__cpuid_count;

    // leaf 7 exists on every CPU that reports avx512f
    let leaf7 = unsafe { __cpuid_count(7, 0) };
    let pf = leaf7.ebx & (1 << 26) != 0;
    let er = leaf7.ebx & (1 << 27) != 0;
    pf && er
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn detect() -> i32 {
    ISA_GENERIC
}
