//! Execution backend selection.
//!
//! A run names one denoising backend on the command line.  The execution
//! queue it creates must additionally carry the general-purpose-compute
//! capability, because format conversion is only defined there.  That rule
//! lives in exactly one place: [`Backend::stream_capabilities`].

use std::fmt;

use crate::error::{EngineError, Result};

/// Tokens accepted by [`select`], in display order.
pub const BACKEND_TOKENS: &[&str] = &["cuda", "vic"];

/// Execution target for an accelerator operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// General-purpose compute engine.  Runs denoising and every format conversion.
    Cuda,
    /// Fixed-function video image compositor.  Runs denoising only.
    Vic,
}

impl Backend {
    /// Command-line token for this backend.
    pub const fn token(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Vic => "vic",
        }
    }

    /// Whether this is the general-purpose compute engine.
    pub const fn is_compute(self) -> bool {
        matches!(self, Self::Cuda)
    }

    /// Capabilities an execution queue needs to run a full denoising pass
    /// with this backend: the backend itself plus compute for conversions.
    pub fn stream_capabilities(self) -> CapabilitySet {
        CapabilitySet::only(self).with_compute()
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Cuda => 1 << 0,
            Self::Vic => 1 << 1,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Map a requested backend token to its descriptor.
///
/// Accepts exactly the tokens in [`BACKEND_TOKENS`] (case-sensitive).
pub fn select(name: &str) -> Result<Backend> {
    match name {
        "cuda" => Ok(Backend::Cuda),
        "vic" => Ok(Backend::Vic),
        other => Err(EngineError::Configuration(format!(
            "backend '{other}' not recognized, it must be either {}",
            BACKEND_TOKENS.join(" or ")
        ))),
    }
}

/// Set of backends an execution queue or device can run.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(Backend::Cuda.bit() | Backend::Vic.bit());

    pub const fn only(backend: Backend) -> Self {
        Self(backend.bit())
    }

    /// This set plus the general-purpose compute capability.
    pub const fn with_compute(self) -> Self {
        Self(self.0 | Backend::Cuda.bit())
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, backend: Backend) -> bool {
        self.0 & backend.bit() != 0
    }

    /// `true` if every backend in `other` is also in `self`.
    pub const fn is_superset_of(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Backend> {
        [Backend::Cuda, Backend::Vic]
            .into_iter()
            .filter(move |b| self.contains(*b))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Backend::token).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}
