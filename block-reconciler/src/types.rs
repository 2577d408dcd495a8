//! Core types shared between block workers and the reconciler.

use alloy_primitives::{keccak256, Address, Bloom, Bytes, Log, B256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header};
use std::fmt;

/// Transaction position in the block (0-based).
pub type TxnIndex = usize;

/// Stable identifier of a transaction within a block.
///
/// Workers write results under this key and the reconciler looks them up by it,
/// so it must be derived from the transaction itself and never from the worker
/// that happened to execute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxKey(pub B256);

impl TxKey {
    /// Derives the key from the canonical transaction bytes.
    pub fn from_tx_bytes(bytes: &[u8]) -> Self {
        Self(keccak256(bytes))
    }
}

impl From<B256> for TxKey {
    fn from(hash: B256) -> Self {
        Self(hash)
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A log emitted by a transaction together with its block-level ordinals.
///
/// `index` and `tx_index` are zero when the executor produces the entry. Only
/// the reconciler knows the final position of the transaction in the block and
/// assigns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Address, topics and data.
    pub inner: Log,
    /// Hash of the transaction that emitted the log.
    pub tx_hash: B256,
    /// Block-wide log ordinal.
    pub index: u64,
    /// Ordinal of the emitting transaction among included transactions.
    pub tx_index: u64,
}

impl LogEntry {
    /// Wraps an engine log with placeholder ordinals.
    pub fn new(inner: Log, tx_hash: B256) -> Self {
        Self { inner, tx_hash, index: 0, tx_index: 0 }
    }

    fn payload_length(&self) -> usize {
        self.inner.address.length()
            + alloy_rlp::list_length::<B256, B256>(self.inner.topics())
            + self.inner.data.data.length()
            + self.tx_hash.length()
            + self.index.length()
            + self.tx_index.length()
    }
}

impl Encodable for LogEntry {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.inner.address.encode(out);
        alloy_rlp::encode_list::<B256, B256>(self.inner.topics(), out);
        self.inner.data.data.encode(out);
        self.tx_hash.encode(out);
        self.index.encode(out);
        self.tx_index.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for LogEntry {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started = buf.len();

        let address = Address::decode(buf)?;
        let topics = Vec::<B256>::decode(buf)?;
        let data = Bytes::decode(buf)?;
        let tx_hash = B256::decode(buf)?;
        let index = u64::decode(buf)?;
        let tx_index = u64::decode(buf)?;

        let consumed = started - buf.len();
        if consumed != header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: header.payload_length,
                got: consumed,
            });
        }

        Ok(Self { inner: Log::new_unchecked(address, topics, data), tx_hash, index, tx_index })
    }
}

/// Error produced when a [`ResultData`] cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A log recorded under this result was emitted by another transaction.
    #[error("log {position} belongs to transaction {found}, expected {expected}")]
    ForeignLog {
        /// Position of the offending log inside the result.
        position: usize,
        /// Hash of the transaction that owns the result.
        expected: B256,
        /// Hash carried by the log.
        found: B256,
    },
}

/// The state-transition artifact of one executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultData {
    /// Bloom over the transaction's logs.
    pub bloom: Bloom,
    /// Logs in execution order.
    pub logs: Vec<LogEntry>,
    /// Data returned by the call, or the deployed code for creations.
    pub ret: Bytes,
    /// Address of the created contract, for contract creations.
    pub contract_address: Option<Address>,
    /// Hash of the transaction.
    pub tx_hash: B256,
}

impl ResultData {
    /// Encodes the result to its canonical RLP form.
    ///
    /// Fails if a log does not belong to this transaction, since a mixed-up
    /// result would make the encoded receipt diverge between nodes.
    pub fn encode_to_bytes(&self) -> Result<Bytes, EncodeError> {
        if let Some((position, log)) =
            self.logs.iter().enumerate().find(|(_, log)| log.tx_hash != self.tx_hash)
        {
            return Err(EncodeError::ForeignLog {
                position,
                expected: self.tx_hash,
                found: log.tx_hash,
            });
        }
        Ok(alloy_rlp::encode(self).into())
    }

    /// Decodes a result previously produced by [`ResultData::encode_to_bytes`].
    pub fn decode_bytes(mut bytes: &[u8]) -> alloy_rlp::Result<Self> {
        Self::decode(&mut bytes)
    }

    fn payload_length(&self) -> usize {
        self.bloom.length()
            + alloy_rlp::list_length::<LogEntry, LogEntry>(&self.logs)
            + self.ret.length()
            + self.tx_hash.length()
            + self.contract_address.map_or(0, |address| address.length())
    }
}

impl Encodable for ResultData {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.bloom.encode(out);
        alloy_rlp::encode_list::<LogEntry, LogEntry>(&self.logs, out);
        self.ret.encode(out);
        self.tx_hash.encode(out);
        // Trailing field, omitted for plain calls.
        if let Some(address) = self.contract_address {
            address.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for ResultData {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started = buf.len();

        let bloom = Bloom::decode(buf)?;
        let logs = Vec::<LogEntry>::decode(buf)?;
        let ret = Bytes::decode(buf)?;
        let tx_hash = B256::decode(buf)?;

        let mut consumed = started - buf.len();
        let contract_address = if consumed < header.payload_length {
            let address = Address::decode(buf)?;
            consumed = started - buf.len();
            Some(address)
        } else {
            None
        };

        if consumed != header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: header.payload_length,
                got: consumed,
            });
        }

        Ok(Self { bloom, logs, ret, contract_address, tx_hash })
    }
}

/// What a worker recorded for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxResult {
    /// The state-transition artifact, absent when execution produced none.
    pub result_data: Option<ResultData>,
    /// The execution error, if the transaction failed.
    pub error: Option<String>,
}

impl TxResult {
    /// A successful execution.
    pub fn success(result_data: ResultData) -> Self {
        Self { result_data: Some(result_data), error: None }
    }

    /// A failed execution.
    pub fn failure(error: impl fmt::Display) -> Self {
        Self { result_data: None, error: Some(error.to_string()) }
    }

    /// A transaction that never produced an execution artifact.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if an execution artifact was recorded.
    pub fn has_result(&self) -> bool {
        self.result_data.is_some()
    }
}

/// A transaction's entry in the block-ordered input of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTxStatus {
    /// Key the transaction's result was recorded under.
    pub key: TxKey,
    /// Error reported by the pre-execution checks, if they rejected it.
    pub ante_error: Option<String>,
}

impl BlockTxStatus {
    /// A transaction that passed the pre-execution checks.
    pub fn passed(key: TxKey) -> Self {
        Self { key, ante_error: None }
    }

    /// A transaction rejected before execution.
    pub fn ante_failed(key: TxKey, error: impl Into<String>) -> Self {
        Self { key, ante_error: Some(error.into()) }
    }

    /// Returns true if a non-empty pre-execution failure marker is set.
    pub fn is_ante_failed(&self) -> bool {
        self.ante_error.as_deref().is_some_and(|error| !error.is_empty())
    }
}
