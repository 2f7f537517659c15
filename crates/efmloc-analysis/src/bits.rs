//! The closed set of EFM bits and derived measurement kinds.

use std::collections::BTreeSet;

use crate::errors::AnalysisError;

/// A single EFM bit or a derived combination measured from one.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EfmBit {
    Q,
    L,
    R,
    T,
    Spin,
    Qr,
    Ql,
    Qt,
    Lt,
    Seq,
    /// TCP reordering.
    Tcpro,
    /// TCP DART delay.
    Tcpdart,
    /// Active ping delay.
    Pingdly,
    /// Active ping loss.
    Pinglss,
}

/// A set of bits evaluated together.
pub type EfmBitSet = BTreeSet<EfmBit>;

impl EfmBit {
    /// Loss bits measure loss rates; the rest measure delays.
    pub fn is_loss(self) -> bool {
        match self {
            EfmBit::Seq
            | EfmBit::Q
            | EfmBit::L
            | EfmBit::T
            | EfmBit::R
            | EfmBit::Qr
            | EfmBit::Qt
            | EfmBit::Ql
            | EfmBit::Lt
            | EfmBit::Tcpro
            | EfmBit::Pinglss => true,
            EfmBit::Spin | EfmBit::Tcpdart | EfmBit::Pingdly => false,
        }
    }

    /// Active measurements come from ping pairs rather than observed flows.
    pub fn is_active(self) -> bool {
        matches!(self, EfmBit::Pinglss | EfmBit::Pingdly)
    }

    /// Bits whose coverage grows monotonically along the flow path, which is
    /// what the differential "combined flow" characterization requires.
    pub fn supports_flow_combination(self) -> bool {
        matches!(self, EfmBit::Q | EfmBit::Spin | EfmBit::Tcpdart)
    }
}

/// Checks that a bit set measures only losses or only delays, and returns
/// `true` for a loss set. Mixing the two families is a config error.
pub fn bit_set_is_loss(bits: &EfmBitSet) -> Result<bool, AnalysisError> {
    let mut loss = None;
    for &bit in bits {
        match loss {
            None => loss = Some(bit.is_loss()),
            Some(l) if l != bit.is_loss() => return Err(AnalysisError::MixedBitSet),
            _ => {}
        }
    }
    Ok(loss.unwrap_or(true))
}

/// Whether the set is exactly one bit eligible for flow combination.
pub fn is_single_combination_set(bits: &EfmBitSet) -> bool {
    match bits.iter().next() {
        Some(bit) if bits.len() == 1 => bit.supports_flow_combination(),
        _ => false,
    }
}
