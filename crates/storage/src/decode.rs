//! Recognition of EVM transactions among a block's raw transactions.

use crate::{StoreResult, TxDecoder};
use alloy::{
    consensus::TxEnvelope,
    eips::eip2718::Decodable2718,
    primitives::{B256, Bytes},
};
use tracing::trace;

/// A raw stored transaction after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedTx {
    /// The transaction carries an EVM transaction.
    Evm(Box<TxEnvelope>),
    /// Any other transaction kind. These are invisible to the EVM RPC.
    Other,
}

impl DecodedTx {
    /// Get the EVM transaction, if any.
    pub fn as_evm(&self) -> Option<&TxEnvelope> {
        match self {
            Self::Evm(tx) => Some(tx),
            Self::Other => None,
        }
    }

    /// Hash of the EVM transaction, if any.
    pub fn evm_hash(&self) -> Option<B256> {
        self.as_evm().map(|tx| *tx.tx_hash())
    }
}

/// A [`TxDecoder`] for chains that store EVM transactions as EIP-2718
/// envelopes alongside other transaction kinds.
///
/// Bytes that do not decode as a complete envelope are reported as
/// [`DecodedTx::Other`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Eip2718Decoder;

impl TxDecoder for Eip2718Decoder {
    fn decode(&self, raw: &[u8]) -> StoreResult<DecodedTx> {
        let mut buf = raw;
        match TxEnvelope::decode_2718(&mut buf) {
            Ok(tx) if buf.is_empty() => Ok(DecodedTx::Evm(Box::new(tx))),
            Ok(_) => {
                trace!(len = raw.len(), "trailing bytes after envelope, treating as non-evm");
                Ok(DecodedTx::Other)
            }
            Err(err) => {
                trace!(%err, len = raw.len(), "not an evm envelope");
                Ok(DecodedTx::Other)
            }
        }
    }
}

/// Decode every transaction in a block, returning the hashes of the EVM
/// transactions in block order.
pub fn evm_tx_hashes<D: TxDecoder + ?Sized>(decoder: &D, txs: &[Bytes]) -> StoreResult<Vec<B256>> {
    let mut hashes = Vec::with_capacity(txs.len());
    for raw in txs {
        if let Some(hash) = decoder.decode(raw)?.evm_hash() {
            hashes.push(hash);
        }
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{
        consensus::{Signed, TxLegacy},
        eips::eip2718::Encodable2718,
        primitives::{Address, Signature, TxKind, U256},
    };

    fn legacy(nonce: u64) -> TxEnvelope {
        let tx = TxLegacy {
            nonce,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::ZERO),
            value: U256::from(1),
            ..Default::default()
        };
        let sig = Signature::new(U256::from(1), U256::from(1), false);
        TxEnvelope::Legacy(Signed::new_unhashed(tx, sig))
    }

    #[test]
    fn decodes_envelope() {
        let tx = legacy(7);
        let raw = tx.encoded_2718();
        let decoded = Eip2718Decoder.decode(&raw).unwrap();
        assert_eq!(decoded.evm_hash(), Some(*tx.tx_hash()));
    }

    #[test]
    fn garbage_is_other() {
        assert_eq!(Eip2718Decoder.decode(&[0xde, 0xad]).unwrap(), DecodedTx::Other);
        assert_eq!(Eip2718Decoder.decode(&[]).unwrap(), DecodedTx::Other);
    }

    #[test]
    fn hashes_skip_non_evm() {
        let a = legacy(0);
        let b = legacy(1);
        let txs = vec![
            Bytes::from(a.encoded_2718()),
            Bytes::from_static(&[0xff, 0x01]),
            Bytes::from(b.encoded_2718()),
        ];
        let hashes = evm_tx_hashes(&Eip2718Decoder, &txs).unwrap();
        assert_eq!(hashes, vec![*a.tx_hash(), *b.tx_hash()]);
    }
}
