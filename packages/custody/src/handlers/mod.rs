//! Transaction handlers.
//!
//! Each handler is replayed identically by every validator:
//! - `lock` - Bitcoin lock into a vault (`BtcLock`)
//! - `signature` - validator co-signature of the pending custody tx (`BtcAddSignature`)
//! - `finality` - finality vote that mints on quorum (`BtcReportFinalityMint`)
//! - `redeem` - Ethereum redemption request (`EthRedeem`)
//!
//! Handlers never block and never reach the network; the only chain driver
//! calls they make are pure decoders.

mod finality;
mod lock;
mod redeem;
mod signature;

pub use finality::*;
pub use lock::*;
pub use redeem::*;
pub use signature::*;

use std::collections::BTreeMap;

use crate::context::{Context, TxResponse};
use crate::error::CustodyError;
use crate::fees::basic_fee_handling;
use crate::tx::{RawTx, SignedTx, TxKind};

pub trait TxHandler: Send + Sync {
    fn kind(&self) -> TxKind;

    /// Stateless and read-only checks: payload, signatures, fee, tracker.
    fn validate(&self, ctx: &Context<'_>, tx: &SignedTx) -> Result<(), CustodyError>;

    /// Mempool admission. Must match `process_deliver` minus job emission.
    fn process_check(&self, ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError>;

    fn process_deliver(&self, ctx: &mut Context<'_>, tx: &RawTx)
        -> Result<TxResponse, CustodyError>;

    /// Returns gas used.
    fn process_fee(
        &self,
        ctx: &mut Context<'_>,
        tx: &SignedTx,
        size: u64,
    ) -> Result<u64, CustodyError> {
        basic_fee_handling(ctx.storage, tx, size, 1)
    }
}

/// Dispatch table from transaction kind to handler.
#[derive(Default)]
pub struct Router {
    handlers: BTreeMap<TxKind, Box<dyn TxHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_handlers() -> Self {
        let mut router = Self::new();
        router
            .register(Box::new(LockHandler))
            .register(Box::new(AddSignatureHandler))
            .register(Box::new(ReportFinalityHandler))
            .register(Box::new(RedeemHandler));
        router
    }

    pub fn register(&mut self, handler: Box<dyn TxHandler>) -> &mut Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: TxKind) -> Result<&dyn TxHandler, CustodyError> {
        self.handlers
            .get(&kind)
            .map(|h| h.as_ref())
            .ok_or_else(|| CustodyError::WrongTxType {
                expected: "a registered transaction kind".to_string(),
                got: kind.to_string(),
            })
    }

    pub fn kinds(&self) -> Vec<TxKind> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_router_covers_all_kinds() {
        let router = Router::with_default_handlers();
        assert_eq!(
            router.kinds(),
            vec![
                TxKind::BtcLock,
                TxKind::BtcAddSignature,
                TxKind::BtcReportFinalityMint,
                TxKind::EthRedeem
            ]
        );
        for kind in router.kinds() {
            assert_eq!(router.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_empty_router_rejects() {
        let router = Router::new();
        assert!(matches!(
            router.get(TxKind::BtcLock),
            Err(CustodyError::WrongTxType { .. })
        ));
    }
}
