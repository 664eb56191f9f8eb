use serde::{Deserialize, Serialize};

/// Virtual size of one script-path input (2 signatures, leaf, control block).
pub const SCRIPT_PATH_INPUT_VBYTES: u64 = 150;
/// Virtual size of one P2WPKH input.
pub const P2WPKH_INPUT_VBYTES: u64 = 68;
/// Virtual size of one output.
pub const OUTPUT_VBYTES: u64 = 31;
/// Version, locktime, counts and segwit marker.
pub const TX_OVERHEAD_VBYTES: u64 = 11;
/// The P2TR contract output of a match-funding transaction.
pub const P2TR_OUTPUT_VBYTES: u64 = 43;

pub const DEFAULT_FEE_RATE: u64 = 2;
pub const DEFAULT_DUST_LIMIT: u64 = 546;

/// Flat fee estimation in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub fee_rate: u64,
    pub dust_limit: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_rate: DEFAULT_FEE_RATE,
            dust_limit: DEFAULT_DUST_LIMIT,
        }
    }
}

impl FeePolicy {
    pub fn new(fee_rate: u64, dust_limit: u64) -> Self {
        Self {
            fee_rate,
            dust_limit,
        }
    }

    pub fn script_path_vbytes(inputs: usize, outputs: usize) -> u64 {
        inputs as u64 * SCRIPT_PATH_INPUT_VBYTES
            + outputs as u64 * OUTPUT_VBYTES
            + TX_OVERHEAD_VBYTES
    }

    /// Always budgets a change slot, whether or not change is emitted.
    pub fn match_funding_vbytes(inputs: usize) -> u64 {
        inputs as u64 * P2WPKH_INPUT_VBYTES
            + P2TR_OUTPUT_VBYTES
            + OUTPUT_VBYTES
            + TX_OVERHEAD_VBYTES
    }

    pub fn script_path_fee(&self, inputs: usize, outputs: usize) -> u64 {
        Self::script_path_vbytes(inputs, outputs) * self.fee_rate
    }

    pub fn match_funding_fee(&self, inputs: usize) -> u64 {
        Self::match_funding_vbytes(inputs) * self.fee_rate
    }

    pub fn is_dust(&self, value: u64) -> bool {
        value <= self.dust_limit
    }
}
