//! Ledger transactions.
//!
//! This module provides the transaction types for Lattice:
//! - [`Transaction`] - the core transaction record with chain coordinates
//! - [`Signature`] - recoverable ECDSA signature components (r, s, v)
//! - [`TxType`] - transaction kind enumeration
//!
//! A transaction's identity is the Keccak256 digest of its canonical
//! encoding *excluding* the signature; the sender address must match the
//! address recovered from the signature over that digest.

use crate::codec::{self, Reader};
use crate::{Address, ChainCoordinate, Error, Result, H256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum TxType {
    /// Creates a new asset; the sender becomes the issuer.
    Issue = 0,
    /// Updates mutable attributes of an existing asset.
    IssueUpdate = 1,
    /// Plain value transfer within one chain.
    #[default]
    AtomicTransfer = 2,
    /// Transfer crossing a chain boundary.
    AcrossChain = 3,
    /// A settled cross-chain aggregate produced by the merge pipeline.
    Merged = 4,
    /// Deploys a Lua contract.
    LuaContractInit = 5,
    /// Deploys a JavaScript contract.
    JsContractInit = 6,
    /// Invokes a deployed contract.
    ContractInvoke = 7,
    /// Read-only contract query; never commits state.
    ContractQuery = 8,
    /// Security policy update transaction.
    Security = 9,
}

impl TxType {
    /// Returns the type byte.
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Creates a TxType from a byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Issue),
            1 => Ok(Self::IssueUpdate),
            2 => Ok(Self::AtomicTransfer),
            3 => Ok(Self::AcrossChain),
            4 => Ok(Self::Merged),
            5 => Ok(Self::LuaContractInit),
            6 => Ok(Self::JsContractInit),
            7 => Ok(Self::ContractInvoke),
            8 => Ok(Self::ContractQuery),
            9 => Ok(Self::Security),
            _ => Err(Error::InvalidTransaction(format!(
                "unknown transaction type: {byte}"
            ))),
        }
    }

    /// True for `Issue` and `IssueUpdate`.
    pub fn is_issue(&self) -> bool {
        matches!(self, Self::Issue | Self::IssueUpdate)
    }

    /// True for transaction kinds executed by a script interpreter.
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            Self::LuaContractInit
                | Self::JsContractInit
                | Self::ContractInvoke
                | Self::ContractQuery
        )
    }
}

/// Recoverable ECDSA signature components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Signature {
    /// Recovery id (0 or 1)
    pub v: u8,
    /// R component (32 bytes)
    pub r: H256,
    /// S component (32 bytes)
    pub s: H256,
}

impl Signature {
    /// Creates a new signature from components.
    pub const fn new(v: u8, r: H256, s: H256) -> Self {
        Self { v, r, s }
    }

    /// Creates a signature from raw bytes (65 bytes: r[32] || s[32] || v[1]).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::InvalidLength {
                expected: 65,
                actual: bytes.len(),
            });
        }
        let r = H256::from_slice(&bytes[0..32])?;
        let s = H256::from_slice(&bytes[32..64])?;
        Ok(Self { v: bytes[64], r, s })
    }

    /// Converts the signature to raw bytes (65 bytes: r[32] || s[32] || v[1]).
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(self.r.as_bytes());
        bytes[32..64].copy_from_slice(self.s.as_bytes());
        bytes[64] = self.v;
        bytes
    }

    /// Recovers the public key that produced this signature over `prehash`.
    pub fn recover(&self, prehash: &H256) -> Result<VerifyingKey> {
        let mut sig_bytes = [0u8; 64];
        sig_bytes[0..32].copy_from_slice(self.r.as_bytes());
        sig_bytes[32..64].copy_from_slice(self.s.as_bytes());

        let signature = K256Signature::from_bytes((&sig_bytes).into())
            .map_err(|e| Error::Signature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.v)
            .ok_or_else(|| Error::Signature(format!("invalid recovery id: {}", self.v)))?;

        VerifyingKey::recover_from_prehash(prehash.as_bytes(), &signature, recovery_id)
            .map_err(|e| Error::Signature(e.to_string()))
    }
}

/// A ledger transaction.
///
/// All fields are set at construction; a transaction is immutable once
/// signed. The mempool orders transactions by
/// `(to_chain, sender, nonce, fee descending)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Source chain coordinate
    pub from_chain: ChainCoordinate,
    /// Destination chain coordinate
    pub to_chain: ChainCoordinate,
    /// Transaction kind
    pub tx_type: TxType,
    /// Sender nonce
    pub nonce: u32,
    /// Sender address; must match the signature
    pub sender: Address,
    /// Recipient address
    pub recipient: Address,
    /// Asset being moved or issued
    pub asset_id: u32,
    /// Amount moved from sender to recipient
    pub amount: i64,
    /// Fee credited per the chain's policy
    pub fee: i64,
    /// Creation time (seconds since epoch)
    pub timestamp: u32,
    /// Type-dependent payload (asset JSON, contract spec, ...)
    #[serde(default, with = "hex_bytes")]
    pub payload: Vec<u8>,
    /// Signature; `None` only while a transaction is being built
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Creates an unsigned transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from_chain: ChainCoordinate,
        to_chain: ChainCoordinate,
        tx_type: TxType,
        nonce: u32,
        sender: Address,
        recipient: Address,
        asset_id: u32,
        amount: i64,
        fee: i64,
        timestamp: u32,
    ) -> Self {
        Self {
            from_chain,
            to_chain,
            tx_type,
            nonce,
            sender,
            recipient,
            asset_id,
            amount,
            fee,
            timestamp,
            payload: Vec::new(),
            signature: None,
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Canonical encoding excluding the signature.
    fn encode_unsigned(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.payload.len());
        codec::write_bytes(&mut buf, self.from_chain.as_bytes());
        codec::write_bytes(&mut buf, self.to_chain.as_bytes());
        buf.push(self.tx_type.as_byte());
        codec::write_u32(&mut buf, self.nonce);
        codec::write_bytes(&mut buf, self.sender.as_bytes());
        codec::write_bytes(&mut buf, self.recipient.as_bytes());
        codec::write_u32(&mut buf, self.asset_id);
        codec::write_i64(&mut buf, self.amount);
        codec::write_i64(&mut buf, self.fee);
        codec::write_u32(&mut buf, self.timestamp);
        codec::write_bytes(&mut buf, &self.payload);
        buf
    }

    /// Full canonical encoding including the signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.encode_unsigned();
        match &self.signature {
            Some(sig) => codec::write_bytes(&mut buf, &sig.to_bytes()),
            None => codec::write_bytes(&mut buf, &[]),
        }
        buf
    }

    /// Decodes a transaction from its full canonical encoding.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let from_chain = ChainCoordinate::new(reader.read_bytes()?.to_vec());
        let to_chain = ChainCoordinate::new(reader.read_bytes()?.to_vec());
        let tx_type = TxType::from_byte(reader.read_u8()?)?;
        let nonce = reader.read_u32()?;
        let sender = Address::from_slice(reader.read_bytes()?)?;
        let recipient = Address::from_slice(reader.read_bytes()?)?;
        let asset_id = reader.read_u32()?;
        let amount = reader.read_i64()?;
        let fee = reader.read_i64()?;
        let timestamp = reader.read_u32()?;
        let payload = reader.read_bytes()?.to_vec();
        let sig_bytes = reader.read_bytes()?;
        let signature = if sig_bytes.is_empty() {
            None
        } else {
            Some(Signature::from_bytes(sig_bytes)?)
        };

        Ok(Self {
            from_chain,
            to_chain,
            tx_type,
            nonce,
            sender,
            recipient,
            asset_id,
            amount,
            fee,
            timestamp,
            payload,
            signature,
        })
    }

    /// Returns the digest that is signed: the canonical encoding without the
    /// signature.
    pub fn sign_hash(&self) -> H256 {
        H256::keccak256(&self.encode_unsigned())
    }

    /// Returns the transaction identity.
    ///
    /// The identity excludes the signature, so it is stable across signing.
    pub fn hash(&self) -> H256 {
        self.sign_hash()
    }

    /// Signs the transaction, setting both the signature and the sender
    /// address derived from the key.
    pub fn sign(mut self, key: &SigningKey) -> Result<Self> {
        self.sender = Address::from_public_key(key.verifying_key());
        let hash = self.sign_hash();

        let (signature, recovery_id) = key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|e| Error::Signature(e.to_string()))?;

        let sig_bytes = signature.to_bytes();
        let r = H256::from_slice(&sig_bytes[0..32])?;
        let s = H256::from_slice(&sig_bytes[32..64])?;
        self.signature = Some(Signature::new(recovery_id.to_byte(), r, s));
        Ok(self)
    }

    /// Recovers the signer address and checks it against the sender field.
    pub fn verify(&self) -> Result<Address> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::InvalidTransaction("missing signature".into()))?;
        let key = signature.recover(&self.sign_hash())?;
        let recovered = Address::from_public_key(&key);
        if recovered != self.sender {
            return Err(Error::InvalidTransaction(format!(
                "sender mismatch: declared {}, recovered {}",
                self.sender, recovered
            )));
        }
        Ok(recovered)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tx {{ hash: {}, type: {:?}, nonce: {}, sender: {}, recipient: {}, amount: {} }}",
            self.hash(),
            self.tx_type,
            self.nonce,
            self.sender,
            self.recipient,
            self.amount
        )
    }
}

/// Serde helper for serializing payload bytes as hex.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn sample_tx() -> Transaction {
        Transaction::new(
            ChainCoordinate::from_hex("00").unwrap(),
            ChainCoordinate::from_hex("00").unwrap(),
            TxType::AtomicTransfer,
            7,
            Address::ZERO,
            Address::new([2u8; 20]),
            0,
            200,
            10,
            1_700_000_000,
        )
    }

    #[test]
    fn sign_and_verify() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let tx = sample_tx().sign(&key).unwrap();
        let recovered = tx.verify().unwrap();
        assert_eq!(recovered, Address::from_public_key(key.verifying_key()));
    }

    #[test]
    fn hash_excludes_signature() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let unsigned = sample_tx();
        let mut expected = unsigned.clone();
        expected.sender = Address::from_public_key(key.verifying_key());
        let signed = unsigned.sign(&key).unwrap();
        assert_eq!(signed.hash(), expected.hash());
    }

    #[test]
    fn encode_decode_round_trip() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let tx = sample_tx()
            .with_payload(br#"{"id":7}"#.to_vec())
            .sign(&key)
            .unwrap();
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(tx.hash(), decoded.hash());
    }

    #[test]
    fn tampered_sender_rejected() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let mut tx = sample_tx().sign(&key).unwrap();
        tx.sender = Address::new([9u8; 20]);
        assert!(tx.verify().is_err());
    }
}
