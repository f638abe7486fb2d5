//! Lease Program Transactions
//!
//! A closed set of variants sharing one [`BaseTx`] envelope. The signature
//! covers the borsh encoding of the unsigned transaction; proof-of-work is
//! measured over the same bytes so mining happens before signing.

use crate::{
    constants::MAX_PREFIX_SIZE,
    error::ChainError,
    genesis::Genesis,
    id::Id,
    parser,
};
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Fields common to every transaction
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct BaseTx {
    /// ed25519 public key of the signer
    pub sender: [u8; 32],
    /// Recent block the transaction was issued against (replay guard)
    pub block_id: Id,
    /// Namespace the transaction operates on
    pub prefix: String,
    /// Chain identifier
    pub magic: u64,
    /// Maximum fee units the sender is willing to pay
    pub max_units: u64,
    /// Free-form nonce varied while mining
    pub graffiti: u64,
}

/// Claim an unclaimed or expired namespace
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClaimTx {
    pub base: BaseTx,
}

/// Extend the life of a held namespace
///
/// Added expiry is `units * lifeline_unit_reward / prefix units`.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct LifelineTx {
    pub base: BaseTx,
    /// Additional work the sender pays for
    pub units: u64,
}

/// Write a value under a held namespace
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct SetTx {
    pub base: BaseTx,
    pub key: String,
    pub value: Vec<u8>,
}

/// Remove a value from a held namespace
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeleteTx {
    pub base: BaseTx,
    pub key: String,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum UnsignedTransaction {
    Claim(ClaimTx),
    Lifeline(LifelineTx),
    Set(SetTx),
    Delete(DeleteTx),
}

/// Units charged per `value_unit_size` bytes of value, rounded up to at least one
pub fn value_units(genesis: &Genesis, size: usize) -> u64 {
    size as u64 / genesis.value_unit_size + 1
}

/// Desirability of a namespace: shorter is more valuable
pub fn prefix_units(genesis: &Genesis, prefix: &str) -> u64 {
    let len = prefix.len() as u64;
    let desirability = (MAX_PREFIX_SIZE as u64).saturating_sub(len) + 1;
    let multiplier = if len > genesis.claim_tier2_size {
        genesis.claim_tier3_multiplier
    } else if len > genesis.claim_tier1_size {
        genesis.claim_tier2_multiplier
    } else {
        genesis.claim_tier1_multiplier
    };
    desirability.saturating_mul(multiplier)
}

impl UnsignedTransaction {
    pub fn base(&self) -> &BaseTx {
        match self {
            UnsignedTransaction::Claim(tx) => &tx.base,
            UnsignedTransaction::Lifeline(tx) => &tx.base,
            UnsignedTransaction::Set(tx) => &tx.base,
            UnsignedTransaction::Delete(tx) => &tx.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseTx {
        match self {
            UnsignedTransaction::Claim(tx) => &mut tx.base,
            UnsignedTransaction::Lifeline(tx) => &mut tx.base,
            UnsignedTransaction::Set(tx) => &mut tx.base,
            UnsignedTransaction::Delete(tx) => &mut tx.base,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("UnsignedTransaction serialization should not fail")
    }

    /// Proof-of-work carried by these bytes
    ///
    /// `u64::MAX / leading 8 bytes of the digest`: reaching difficulty `d`
    /// takes about `d` hash attempts.
    pub fn work(&self) -> u64 {
        let digest = blake3::hash(&self.to_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        u64::MAX / u64::from_be_bytes(head).max(1)
    }

    /// Vary graffiti until the work reaches `difficulty`
    pub fn mine(&mut self, difficulty: u64) {
        while self.work() < difficulty {
            let base = self.base_mut();
            base.graffiti = base.graffiti.wrapping_add(1);
        }
    }

    /// Payload size cost shared by every variant
    pub fn load_units(&self, genesis: &Genesis) -> u64 {
        let payload = match self {
            UnsignedTransaction::Claim(tx) => tx.base.prefix.len(),
            UnsignedTransaction::Lifeline(tx) => tx.base.prefix.len(),
            UnsignedTransaction::Set(tx) => tx.base.prefix.len() + tx.key.len() + tx.value.len(),
            UnsignedTransaction::Delete(tx) => tx.base.prefix.len() + tx.key.len(),
        };
        genesis.base_tx_units + payload as u64 / genesis.value_unit_size
    }

    /// Total fee units; depends only on content and genesis
    pub fn fee_units(&self, genesis: &Genesis) -> u64 {
        let load = self.load_units(genesis);
        match self {
            UnsignedTransaction::Claim(tx) => load.saturating_add(
                prefix_units(genesis, &tx.base.prefix).saturating_mul(genesis.claim_fee_multiplier),
            ),
            UnsignedTransaction::Lifeline(tx) => {
                // Discounted so that, all else equal, retaining a prefix is
                // cheaper than claiming it. The heavy base cost favours few
                // large renewals over many small ones.
                let discounted = prefix_units(genesis, &tx.base.prefix) / genesis.prefix_renewal_discount;
                load.saturating_add(discounted).saturating_add(tx.units)
            }
            UnsignedTransaction::Set(tx) => load.saturating_add(value_units(genesis, tx.value.len())),
            UnsignedTransaction::Delete(_) => load,
        }
    }

    /// Structural checks that need no state
    pub fn validate(&self, genesis: &Genesis) -> Result<(), ChainError> {
        let base = self.base();
        if base.magic != genesis.magic {
            return Err(ChainError::InvalidMagic {
                expected: genesis.magic,
                found: base.magic,
            });
        }
        parser::check_prefix(&base.prefix)?;

        match self {
            UnsignedTransaction::Claim(_) => {}
            UnsignedTransaction::Lifeline(tx) => {
                if tx.units == 0 {
                    return Err(ChainError::InvalidUnits);
                }
            }
            UnsignedTransaction::Set(tx) => {
                parser::check_key(&tx.key)?;
                if tx.value.len() as u64 > genesis.max_value_size {
                    return Err(ChainError::ValueTooLarge {
                        size: tx.value.len(),
                        max: genesis.max_value_size,
                    });
                }
            }
            UnsignedTransaction::Delete(tx) => parser::check_key(&tx.key)?,
        }
        Ok(())
    }

    pub fn sign(self, key: &SigningKey) -> Transaction {
        let signature = key.sign(&self.to_bytes()).to_bytes();
        Transaction {
            unsigned: self,
            signature,
        }
    }
}

/// Signed transaction as submitted, gossiped and stored in blocks
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub unsigned: UnsignedTransaction,
    pub signature: [u8; 64],
}

impl Transaction {
    /// Canonical content hash
    pub fn id(&self) -> Id {
        Id::hash(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Transaction serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ChainError> {
        if data.is_empty() {
            return Err(ChainError::InvalidEmptyTx);
        }
        Ok(borsh::from_slice(data)?)
    }

    pub fn base(&self) -> &BaseTx {
        self.unsigned.base()
    }

    pub fn sender(&self) -> &[u8; 32] {
        &self.base().sender
    }

    pub fn prefix(&self) -> &str {
        &self.base().prefix
    }

    pub fn work(&self) -> u64 {
        self.unsigned.work()
    }

    pub fn fee_units(&self, genesis: &Genesis) -> u64 {
        self.unsigned.fee_units(genesis)
    }

    pub fn load_units(&self, genesis: &Genesis) -> u64 {
        self.unsigned.load_units(genesis)
    }

    pub fn verify_signature(&self) -> Result<(), ChainError> {
        let key = VerifyingKey::from_bytes(self.sender()).map_err(|_| ChainError::InvalidSignature)?;
        let signature = Signature::from_bytes(&self.signature);
        key.verify(&self.unsigned.to_bytes(), &signature)
            .map_err(|_| ChainError::InvalidSignature)
    }

    /// Structural validation plus signature authenticity
    pub fn validate(&self, genesis: &Genesis) -> Result<(), ChainError> {
        self.unsigned.validate(genesis)?;
        self.verify_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[1u8; 32])
    }

    fn base(prefix: &str) -> BaseTx {
        BaseTx {
            sender: key().verifying_key().to_bytes(),
            block_id: Id::hash(b"genesis"),
            prefix: prefix.to_string(),
            magic: Genesis::default().magic,
            max_units: u64::MAX,
            graffiti: 0,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let tx = UnsignedTransaction::Claim(ClaimTx { base: base("abc") }).sign(&key());
        tx.validate(&Genesis::default()).unwrap();

        let mut tampered = tx.clone();
        tampered.unsigned.base_mut().prefix = "abd".into();
        assert!(matches!(tampered.verify_signature(), Err(ChainError::InvalidSignature)));
    }

    #[test]
    fn test_bytes_roundtrip_and_identity() {
        let tx = UnsignedTransaction::Set(SetTx {
            base: base("abc"),
            key: "k".into(),
            value: vec![1, 2, 3],
        })
        .sign(&key());

        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
        assert!(matches!(Transaction::from_bytes(&[]), Err(ChainError::InvalidEmptyTx)));
    }

    #[test]
    fn test_fee_units_deterministic() {
        let genesis = Genesis::default();
        let tx = UnsignedTransaction::Lifeline(LifelineTx {
            base: base("abc"),
            units: 10,
        });
        assert_eq!(tx.fee_units(&genesis), tx.clone().fee_units(&genesis));

        // 10 base + (256 - 3 + 1) * 25 / 5 + 10 units
        assert_eq!(tx.fee_units(&genesis), 10 + 254 * 25 / 5 + 10);
    }

    #[test]
    fn test_renewal_cheaper_than_claim() {
        let genesis = Genesis::default();
        let claim = UnsignedTransaction::Claim(ClaimTx { base: base("abc") });
        let lifeline = UnsignedTransaction::Lifeline(LifelineTx {
            base: base("abc"),
            units: 1,
        });
        assert!(lifeline.fee_units(&genesis) < claim.fee_units(&genesis));
    }

    #[test]
    fn test_prefix_units_tiers() {
        let genesis = Genesis::default();
        let short = prefix_units(&genesis, "abc");
        let medium = prefix_units(&genesis, &"a".repeat(20));
        let long = prefix_units(&genesis, &"a".repeat(40));
        assert!(short > medium && medium > long);
        assert_eq!(long, (256 - 40 + 1) * genesis.claim_tier3_multiplier);
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let genesis = Genesis::default();

        let bad_prefix = UnsignedTransaction::Claim(ClaimTx { base: base("ABC") });
        assert!(matches!(bad_prefix.validate(&genesis), Err(ChainError::InvalidPrefix(_))));

        let zero_units = UnsignedTransaction::Lifeline(LifelineTx {
            base: base("abc"),
            units: 0,
        });
        assert!(matches!(zero_units.validate(&genesis), Err(ChainError::InvalidUnits)));

        let mut wrong_magic = base("abc");
        wrong_magic.magic = 99;
        let tx = UnsignedTransaction::Claim(ClaimTx { base: wrong_magic });
        assert!(matches!(tx.validate(&genesis), Err(ChainError::InvalidMagic { .. })));

        let big = UnsignedTransaction::Set(SetTx {
            base: base("abc"),
            key: "k".into(),
            value: vec![0; genesis.max_value_size as usize + 1],
        });
        assert!(matches!(big.validate(&genesis), Err(ChainError::ValueTooLarge { .. })));
    }

    #[test]
    fn test_mine_reaches_difficulty() {
        let mut tx = UnsignedTransaction::Claim(ClaimTx { base: base("abc") });
        tx.mine(64);
        assert!(tx.work() >= 64);
    }
}
