use bitcoin::hashes::Hash;
use bitcoin::key::{TapTweak, TweakedPublicKey};
use bitcoin::secp256k1::{Parity, Secp256k1, XOnlyPublicKey};
use bitcoin::taproot::{ControlBlock, TapNodeHash};
use bitcoin::{Address, Script};

use crate::error::{Error, Result};
use crate::network::Network;
use crate::tree::{ContractTree, LeafKind};

/// NUMS (Nothing Up My Sleeve) key, the BIP-341 provably unspendable internal key.
pub const NUMS_KEY_BYTES: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// Tapscript leaf version (BIP-342).
pub const TAPSCRIPT_LEAF_VERSION: u8 = 0xc0;

pub fn nums_internal_key() -> XOnlyPublicKey {
    XOnlyPublicKey::from_slice(&NUMS_KEY_BYTES).expect("NUMS key is a valid x-only public key")
}

/// The tweaked output of a contract tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddress {
    pub address: Address,
    pub output_key: TweakedPublicKey,
    pub parity: Parity,
}

/// Tweak the NUMS key by `root` and encode the result as a bech32m P2TR address.
pub fn derive_address(root: TapNodeHash, network: Network) -> ContractAddress {
    let secp = Secp256k1::verification_only();
    let (output_key, parity) = nums_internal_key().tap_tweak(&secp, Some(root));
    ContractAddress {
        address: Address::p2tr_tweaked(output_key, network.into_bitcoin()),
        output_key,
        parity,
    }
}

/// Serialize the control block proving `leaf` is committed in `tree`.
///
/// Layout: `[0xc0 | parity] || NUMS || path`, 97 bytes for Win/Loss and 65 for
/// Refund.
pub fn build_control_block(tree: &ContractTree, leaf: LeafKind, parity: Parity) -> Vec<u8> {
    let path = tree.merkle_path(leaf);
    let mut cb = Vec::with_capacity(33 + 32 * path.len());
    cb.push(TAPSCRIPT_LEAF_VERSION | parity.to_u8());
    cb.extend_from_slice(&NUMS_KEY_BYTES);
    for node in path {
        cb.extend_from_slice(node.as_byte_array());
    }
    cb
}

/// Check that `control_block` commits `script` to `output_key`.
pub fn verify_control_block(
    script: &Script,
    control_block: &[u8],
    output_key: XOnlyPublicKey,
) -> Result<bool> {
    let cb = ControlBlock::decode(control_block)
        .map_err(|e| Error::Taproot(format!("control block: {e}")))?;
    let secp = Secp256k1::verification_only();
    Ok(cb.verify_taproot_commitment(&secp, output_key, script))
}
