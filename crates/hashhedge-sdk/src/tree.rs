use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash};
use bitcoin::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::script::{ContractNonce, build_leaf};

/// The three spending conditions of a contract, in tree order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafKind {
    /// User + oracle.
    Win,
    /// House + oracle.
    Loss,
    /// User + house.
    Refund,
}

impl LeafKind {
    pub const ALL: [LeafKind; 3] = [LeafKind::Win, LeafKind::Loss, LeafKind::Refund];
}

/// The fixed-shape MAST `[[Win, Loss], Refund]` for one contract.
///
/// Win and Loss sit at depth 2, Refund at depth 1. Only the leaf contents vary
/// between contracts; shape and leaf order never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTree {
    win: ScriptBuf,
    loss: ScriptBuf,
    refund: ScriptBuf,
    win_hash: TapLeafHash,
    loss_hash: TapLeafHash,
    refund_hash: TapLeafHash,
    branch: TapNodeHash,
    root: TapNodeHash,
}

impl ContractTree {
    pub fn build(
        user: XOnlyPublicKey,
        house: XOnlyPublicKey,
        oracle: XOnlyPublicKey,
        nonce: &ContractNonce,
    ) -> Self {
        let win = build_leaf(user, oracle, nonce);
        let loss = build_leaf(house, oracle, nonce);
        let refund = build_leaf(user, house, nonce);

        let win_hash = tapleaf_hash(&win);
        let loss_hash = tapleaf_hash(&loss);
        let refund_hash = tapleaf_hash(&refund);

        let branch = tapbranch_hash(win_hash.into(), loss_hash.into());
        let root = tapbranch_hash(branch, refund_hash.into());

        Self {
            win,
            loss,
            refund,
            win_hash,
            loss_hash,
            refund_hash,
            branch,
            root,
        }
    }

    pub fn leaf(&self, kind: LeafKind) -> &Script {
        match kind {
            LeafKind::Win => &self.win,
            LeafKind::Loss => &self.loss,
            LeafKind::Refund => &self.refund,
        }
    }

    pub fn leaf_hash(&self, kind: LeafKind) -> TapLeafHash {
        match kind {
            LeafKind::Win => self.win_hash,
            LeafKind::Loss => self.loss_hash,
            LeafKind::Refund => self.refund_hash,
        }
    }

    /// Hash of the `[Win, Loss]` branch.
    pub fn branch_hash(&self) -> TapNodeHash {
        self.branch
    }

    pub fn merkle_root(&self) -> TapNodeHash {
        self.root
    }

    /// Sibling hashes from the leaf up to the root's other child.
    pub fn merkle_path(&self, kind: LeafKind) -> Vec<TapNodeHash> {
        match kind {
            LeafKind::Win => vec![self.loss_hash.into(), self.refund_hash.into()],
            LeafKind::Loss => vec![self.win_hash.into(), self.refund_hash.into()],
            LeafKind::Refund => vec![self.branch],
        }
    }
}

/// `TaggedHash("TapLeaf", 0xc0 || compact_size(len) || script)`.
pub fn tapleaf_hash(script: &Script) -> TapLeafHash {
    TapLeafHash::from_script(script, LeafVersion::TapScript)
}

/// `TaggedHash("TapBranch", min(a, b) || max(a, b))`.
pub fn tapbranch_hash(a: TapNodeHash, b: TapNodeHash) -> TapNodeHash {
    TapNodeHash::from_node_hashes(a, b)
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::taproot::TaprootBuilder;

    use super::*;
    use crate::taproot::nums_internal_key;

    fn xonly(seed: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        SecretKey::from_slice(&[seed; 32])
            .unwrap()
            .x_only_public_key(&secp)
            .0
    }

    fn tree() -> ContractTree {
        ContractTree::build(
            xonly(1),
            xonly(2),
            xonly(3),
            &ContractNonce::from_hex("a1b2c3d4").unwrap(),
        )
    }

    #[test]
    fn root_matches_taproot_builder() {
        let tree = tree();
        let secp = Secp256k1::new();
        let info = TaprootBuilder::new()
            .add_leaf(2, tree.leaf(LeafKind::Win).to_owned())
            .unwrap()
            .add_leaf(2, tree.leaf(LeafKind::Loss).to_owned())
            .unwrap()
            .add_leaf(1, tree.leaf(LeafKind::Refund).to_owned())
            .unwrap()
            .finalize(&secp, nums_internal_key())
            .unwrap();
        assert_eq!(info.merkle_root(), Some(tree.merkle_root()));
    }

    #[test]
    fn tapbranch_commutative() {
        let a = TapNodeHash::from_byte_array([0x01; 32]);
        let b = TapNodeHash::from_byte_array([0x02; 32]);
        assert_eq!(tapbranch_hash(a, b), tapbranch_hash(b, a));
    }

    #[test]
    fn leaves_use_expected_signers() {
        let (user, house, oracle) = (xonly(1), xonly(2), xonly(3));
        let nonce = ContractNonce::from_hex("a1b2c3d4").unwrap();
        let tree = ContractTree::build(user, house, oracle, &nonce);
        assert_eq!(tree.leaf(LeafKind::Win), build_leaf(oracle, user, &nonce).as_script());
        assert_eq!(tree.leaf(LeafKind::Loss), build_leaf(oracle, house, &nonce).as_script());
        assert_eq!(tree.leaf(LeafKind::Refund), build_leaf(house, user, &nonce).as_script());
    }

    #[test]
    fn merkle_paths() {
        let tree = tree();
        let win = tree.merkle_path(LeafKind::Win);
        assert_eq!(win.len(), 2);
        assert_eq!(win[0], TapNodeHash::from(tree.leaf_hash(LeafKind::Loss)));
        assert_eq!(win[1], TapNodeHash::from(tree.leaf_hash(LeafKind::Refund)));

        let refund = tree.merkle_path(LeafKind::Refund);
        assert_eq!(refund, vec![tree.branch_hash()]);
    }

    #[test]
    fn tapleaf_hash_uses_tapleaf_tag() {
        use sha2::{Digest, Sha256};

        let tree = tree();
        let script = tree.leaf(LeafKind::Refund);

        let tag_hash: [u8; 32] = Sha256::digest(b"TapLeaf").into();
        let mut hasher = Sha256::new();
        hasher.update(tag_hash);
        hasher.update(tag_hash);
        hasher.update([0xc0, script.len() as u8]);
        hasher.update(script.as_bytes());
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(tapleaf_hash(script).to_byte_array(), expected);
    }
}
