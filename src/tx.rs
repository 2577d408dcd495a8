//! Block transactions.
//!
//! A block carries EVM transactions alongside standard (non-EVM) ones. The
//! kind is fixed when the transaction is built, as a variant of
//! [`Transaction`].

use crate::transition::StateTransition;
use alloy_primitives::{keccak256, Address, Bytes, Signature, B256, U256};
use block_reconciler::TxKey;
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// An account with its signing key for transaction signing.
#[derive(Clone)]
pub struct Account {
    /// The secp256k1 signing key.
    pub signing_key: SigningKey,
    /// The Ethereum address derived from the public key.
    pub address: Address,
}

impl Account {
    /// Creates a new account from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self { signing_key, address }
    }

    /// Generates a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes);
        let signing_key = SigningKey::from_bytes(&key_bytes.into()).expect("valid key bytes");
        Self::from_signing_key(signing_key)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("address", &self.address).finish()
    }
}

/// Derives an Ethereum address from a secp256k1 public key.
fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Unsigned fields of an EVM transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EthereumTxRequest {
    /// Recipient, `None` deploys a contract.
    pub to: Option<Address>,
    /// Value transferred in wei.
    pub value: U256,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price in wei.
    pub gas_price: U256,
    /// Calldata or init code.
    pub data: Bytes,
}

/// A signed EVM transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumTx {
    /// The claimed sender.
    pub from: Address,
    /// The transaction fields.
    pub request: EthereumTxRequest,
    /// Chain the transaction targets.
    pub chain_id: u64,
    /// The ECDSA signature.
    pub signature: Signature,
    /// Hash of the signed fields.
    pub tx_hash: B256,
}

impl EthereumTx {
    /// Signs `request` with the account's key.
    pub fn new(account: &Account, request: EthereumTxRequest, chain_id: u64) -> Self {
        Self::signed_by(account.address, &account.signing_key, request, chain_id)
    }

    /// Builds a transaction claiming `from` but signed with `signing_key`.
    ///
    /// If the key does not belong to `from`, [`verify`](Self::verify) fails.
    pub fn signed_by(
        from: Address,
        signing_key: &SigningKey,
        request: EthereumTxRequest,
        chain_id: u64,
    ) -> Self {
        let tx_hash = Self::compute_tx_hash(from, &request, chain_id);
        let signature = Self::sign(signing_key, tx_hash);
        Self { from, request, chain_id, signature, tx_hash }
    }

    fn compute_tx_hash(from: Address, request: &EthereumTxRequest, chain_id: u64) -> B256 {
        let mut data = Vec::with_capacity(20 + 21 + 32 * 2 + 8 * 3 + request.data.len());
        data.extend_from_slice(from.as_slice());
        match request.to {
            Some(to) => {
                data.push(1);
                data.extend_from_slice(to.as_slice());
            }
            None => data.push(0),
        }
        data.extend_from_slice(&request.value.to_be_bytes::<32>());
        data.extend_from_slice(&request.nonce.to_be_bytes());
        data.extend_from_slice(&request.gas_limit.to_be_bytes());
        data.extend_from_slice(&request.gas_price.to_be_bytes::<32>());
        data.extend_from_slice(&chain_id.to_be_bytes());
        data.extend_from_slice(&request.data);
        keccak256(&data)
    }

    fn sign(signing_key: &SigningKey, tx_hash: B256) -> Signature {
        let (sig, recovery_id) =
            signing_key.sign_prehash_recoverable(tx_hash.as_slice()).expect("signing should succeed");
        Signature::from_signature_and_parity(sig, recovery_id.is_y_odd())
    }

    /// Recovers the signer's address from the signature.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature.recover_address_from_prehash(&self.tx_hash).ok()
    }

    /// Returns true if the signature was produced by `from`.
    pub fn verify(&self) -> bool {
        self.recover_signer().is_some_and(|signer| signer == self.from)
    }

    /// Builds the state transition executing this transaction.
    pub fn state_transition(&self, simulate: bool) -> StateTransition {
        StateTransition {
            account_nonce: self.request.nonce,
            price: self.request.gas_price,
            gas_limit: self.request.gas_limit,
            recipient: self.request.to,
            amount: self.request.value,
            payload: self.request.data.clone(),
            chain_id: self.chain_id,
            tx_hash: Some(self.tx_hash),
            sender: self.from,
            simulate,
            gas_return: 0,
        }
    }
}

/// A non-EVM transaction that pays a flat fee and never runs code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardTx {
    /// Fee payer.
    pub from: Address,
    /// Flat fee.
    pub fee: U256,
    /// Free-form memo.
    pub memo: String,
    /// Hash of the fields.
    pub tx_hash: B256,
}

impl StandardTx {
    /// Creates a standard transaction.
    pub fn new(from: Address, fee: U256, memo: impl Into<String>) -> Self {
        let memo = memo.into();
        let mut data = Vec::with_capacity(20 + 32 + memo.len());
        data.extend_from_slice(from.as_slice());
        data.extend_from_slice(&fee.to_be_bytes::<32>());
        data.extend_from_slice(memo.as_bytes());
        Self { from, fee, memo, tx_hash: keccak256(&data) }
    }
}

/// Fee of a transaction and whether it is an EVM transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxFee {
    /// Fee paid up front.
    pub amount: U256,
    /// Set for EVM transactions.
    pub is_evm: bool,
}

/// A transaction of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// EVM transaction.
    Ethereum(EthereumTx),
    /// Standard transaction.
    Standard(StandardTx),
}

impl Transaction {
    /// Hash of the transaction.
    pub fn hash(&self) -> B256 {
        match self {
            Self::Ethereum(tx) => tx.tx_hash,
            Self::Standard(tx) => tx.tx_hash,
        }
    }

    /// Key the transaction's result is stored under.
    pub fn key(&self) -> TxKey {
        TxKey(self.hash())
    }

    /// Returns true for EVM transactions.
    pub fn is_evm(&self) -> bool {
        matches!(self, Self::Ethereum(_))
    }

    /// Fee paid up front. For EVM transactions `gas_price * gas_limit`.
    pub fn fee(&self) -> TxFee {
        match self {
            Self::Ethereum(tx) => TxFee {
                amount: tx.request.gas_price.saturating_mul(U256::from(tx.request.gas_limit)),
                is_evm: true,
            },
            Self::Standard(tx) => TxFee { amount: tx.fee, is_evm: false },
        }
    }
}

impl From<EthereumTx> for Transaction {
    fn from(tx: EthereumTx) -> Self {
        Self::Ethereum(tx)
    }
}

impl From<StandardTx> for Transaction {
    fn from(tx: StandardTx) -> Self {
        Self::Standard(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(to: Address) -> EthereumTxRequest {
        EthereumTxRequest {
            to: Some(to),
            value: U256::from(1000),
            gas_limit: 21_000,
            gas_price: U256::from(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_account_generation() {
        let acc1 = Account::from_seed(1);
        let acc2 = Account::from_seed(2);

        // Different seeds produce different accounts.
        assert_ne!(acc1.address, acc2.address);
        // Same seed produces same account.
        assert_eq!(acc1.address, Account::from_seed(1).address);
    }

    #[test]
    fn test_signature_verification() {
        let account = Account::from_seed(42);
        let tx = EthereumTx::new(&account, transfer(Address::ZERO), 1);

        assert!(tx.verify());
        assert_eq!(tx.recover_signer(), Some(account.address));
    }

    #[test]
    fn test_foreign_signature_fails() {
        let victim = Account::from_seed(1);
        let forger = Account::from_seed(2);
        let tx = EthereumTx::signed_by(victim.address, &forger.signing_key, transfer(Address::ZERO), 1);

        assert!(!tx.verify());
        assert_eq!(tx.recover_signer(), Some(forger.address));
    }

    #[test]
    fn test_hash_covers_creation_flag() {
        let account = Account::from_seed(3);
        let call = EthereumTx::new(&account, transfer(Address::ZERO), 1);
        let create = EthereumTx::new(&account, EthereumTxRequest { to: None, ..transfer(Address::ZERO) }, 1);
        assert_ne!(call.tx_hash, create.tx_hash);
    }

    #[test]
    fn test_fee_extraction() {
        let account = Account::from_seed(4);
        let evm: Transaction = EthereumTx::new(&account, transfer(Address::ZERO), 1).into();
        assert_eq!(evm.fee(), TxFee { amount: U256::from(63_000), is_evm: true });

        let standard: Transaction = StandardTx::new(account.address, U256::from(10), "memo").into();
        assert_eq!(standard.fee(), TxFee { amount: U256::from(10), is_evm: false });
        assert!(!standard.is_evm());
    }

    #[test]
    fn test_state_transition_fields() {
        let account = Account::from_seed(5);
        let tx = EthereumTx::new(&account, transfer(Address::repeat_byte(9)), 7);
        let st = tx.state_transition(true);

        assert_eq!(st.sender, account.address);
        assert_eq!(st.recipient, Some(Address::repeat_byte(9)));
        assert_eq!(st.tx_hash, Some(tx.tx_hash));
        assert_eq!(st.chain_id, 7);
        assert!(st.simulate);
    }
}
