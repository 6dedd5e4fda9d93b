//! Transaction application entry points
//!
//! [`App`] is what the replay engine calls. `check_tx` runs validation and the
//! check phase on a throwaway overlay. `deliver_tx` runs validate, fee and
//! deliver phases; the fee and deliver phases are each committed atomically,
//! so a transaction rejected in deliver still pays its fee and leaves no
//! other trace. Neither call ever panics on bad input: every failure becomes
//! a non-zero [`TxResult::code`].

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cosmwasm_std::{Addr, Attribute, Binary, MemoryStorage, StdError, Storage, Uint128};
use tracing::{debug, info};

use crate::address_codec::BitcoinNetwork;
use crate::context::{Context, TxResponse};
use crate::driver::{ChainDrivers, Utxo};
use crate::error::CustodyError;
use crate::fees::{fee_pool, FeeOptions};
use crate::handlers::Router;
use crate::jobs::Job;
use crate::multisig::Multisig;
use crate::state::{Tracker, UtxoRef};
use crate::storage::{apply, StorageCache};
use crate::store::{self, TrackerReader};
use crate::tx::SignedTx;
use crate::validator::{ChainType, ValidatorSetProvider};

pub type SharedStorage = Arc<RwLock<Box<dyn Storage + Send + Sync>>>;

/// Result reported back to the replay engine for one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxResult {
    /// Zero on success, otherwise [`CustodyError::code`]
    pub code: u32,
    pub log: String,
    pub info: String,
    pub attributes: Vec<Attribute>,
    pub jobs: Vec<Job>,
    pub gas_used: u64,
    pub tx_hash: String,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    fn from_response(resp: TxResponse, gas_used: u64, tx_hash: String) -> Self {
        TxResult {
            code: 0,
            log: String::new(),
            info: resp.info,
            attributes: resp.attributes,
            jobs: resp.jobs,
            gas_used,
            tx_hash,
        }
    }

    fn rejected(err: &CustodyError, gas_used: u64, tx_hash: String) -> Self {
        TxResult {
            code: err.code(),
            log: err.to_string(),
            gas_used,
            tx_hash,
            ..Default::default()
        }
    }
}

pub struct App {
    storage: SharedStorage,
    router: Router,
    validators: Arc<dyn ValidatorSetProvider>,
    drivers: ChainDrivers,
    fee_options: FeeOptions,
    network: BitcoinNetwork,
}

impl App {
    pub fn new(
        validators: Arc<dyn ValidatorSetProvider>,
        drivers: ChainDrivers,
        fee_options: FeeOptions,
        network: BitcoinNetwork,
    ) -> Self {
        Self::with_storage(
            Arc::new(RwLock::new(Box::new(MemoryStorage::new()))),
            validators,
            drivers,
            fee_options,
            network,
        )
    }

    pub fn with_storage(
        storage: SharedStorage,
        validators: Arc<dyn ValidatorSetProvider>,
        drivers: ChainDrivers,
        fee_options: FeeOptions,
        network: BitcoinNetwork,
    ) -> Self {
        Self {
            storage,
            router: Router::with_default_handlers(),
            validators,
            drivers,
            fee_options,
            network,
        }
    }

    pub fn network(&self) -> BitcoinNetwork {
        self.network
    }

    pub fn drivers(&self) -> &ChainDrivers {
        &self.drivers
    }

    /// Read-only view for code outside the consensus domain.
    pub fn reader(&self) -> StateReader {
        StateReader {
            storage: self.storage.clone(),
        }
    }

    /// Genesis-style bootstrap of an empty vault.
    pub fn init_vault(&self, name: &str) -> Result<Tracker, CustodyError> {
        let mut guard = self.write()?;
        store::init_vault(&mut **guard, name)
    }

    /// Mempool admission. State is never modified.
    pub fn check_tx(&self, bytes: &[u8]) -> TxResult {
        let tx = match SignedTx::decode(bytes) {
            Ok(tx) => tx,
            Err(e) => return TxResult::rejected(&e, 0, String::new()),
        };
        let tx_hash = tx.hash().unwrap_or_default();

        let guard = match self.read() {
            Ok(g) => g,
            Err(e) => return TxResult::rejected(&e, 0, tx_hash),
        };
        let mut cache = StorageCache::new(&**guard);
        let mut ctx = self.context(&mut cache, 0);

        let result = self.router.get(tx.kind()).and_then(|handler| {
            handler.validate(&ctx, &tx)?;
            handler.process_check(&mut ctx, &tx.raw)
        });

        match result {
            Ok(resp) => TxResult::from_response(resp, 0, tx_hash),
            Err(e) => {
                debug!(kind = %tx.kind(), error = %e, "check_tx rejected");
                TxResult::rejected(&e, 0, tx_hash)
            }
        }
    }

    /// Block-commit application.
    pub fn deliver_tx(&self, height: u64, bytes: &[u8]) -> TxResult {
        let tx = match SignedTx::decode(bytes) {
            Ok(tx) => tx,
            Err(e) => return TxResult::rejected(&e, 0, String::new()),
        };
        let tx_hash = tx.hash().unwrap_or_default();

        let mut gas_used = 0;
        let result = self.deliver_phases(height, &tx, bytes.len() as u64, &mut gas_used);

        match result {
            Ok(resp) => {
                info!(
                    height,
                    kind = %tx.kind(),
                    tx_hash = %tx_hash,
                    jobs = resp.jobs.len(),
                    "Transaction delivered"
                );
                TxResult::from_response(resp, gas_used, tx_hash)
            }
            Err(e) => {
                info!(
                    height,
                    kind = %tx.kind(),
                    tx_hash = %tx_hash,
                    code = e.code(),
                    error = %e,
                    "Transaction rejected"
                );
                TxResult::rejected(&e, gas_used, tx_hash)
            }
        }
    }

    fn deliver_phases(
        &self,
        height: u64,
        tx: &SignedTx,
        size: u64,
        gas_used: &mut u64,
    ) -> Result<TxResponse, CustodyError> {
        let handler = self.router.get(tx.kind())?;
        let mut guard = self.write()?;

        {
            let mut cache = StorageCache::new(&**guard);
            let ctx = self.context(&mut cache, height);
            handler.validate(&ctx, tx)?;
        }

        let fee_ops = {
            let mut cache = StorageCache::new(&**guard);
            let mut ctx = self.context(&mut cache, height);
            *gas_used = handler.process_fee(&mut ctx, tx, size)?;
            drop(ctx);
            cache.into_ops()
        };
        apply(fee_ops, &mut **guard);

        let (resp, ops) = {
            let mut cache = StorageCache::new(&**guard);
            let mut ctx = self.context(&mut cache, height);
            let resp = handler.process_deliver(&mut ctx, &tx.raw)?;
            drop(ctx);
            (resp, cache.into_ops())
        };
        apply(ops, &mut **guard);

        Ok(resp)
    }

    /// Address every lock must pay to: the Bitcoin multisig of the current
    /// validator set.
    pub fn vault_address(&self) -> Result<String, CustodyError> {
        let validators = self.validators.get_validator_set()?;
        let multisig = Multisig::build(&validators, ChainType::Bitcoin, self.network, Binary::default())?;
        Ok(multisig.address)
    }

    /// Build the next unsigned lock transaction for a vault: spends the
    /// vault's current output (if any) plus `new_utxo`, paying to
    /// [`App::vault_address`].
    pub fn prepare_lock(&self, tracker_name: &str, new_utxo: &Utxo) -> Result<Binary, CustodyError> {
        let tracker = {
            let guard = self.read()?;
            store::load_available_tracker(&**guard, ChainType::Bitcoin, tracker_name)?
        };
        let vault_address = self.vault_address()?;

        let current = tracker.current_utxo.as_ref().map(|outpoint| Utxo {
            outpoint: outpoint.clone(),
            value: tracker.current_balance.u128() as u64,
        });

        let tx = self.drivers.get(ChainType::Bitcoin)?.prepare_lock(
            current.as_ref(),
            new_utxo,
            &vault_address,
        )?;
        Ok(tx)
    }

    fn context<'a>(&'a self, storage: &'a mut dyn Storage, height: u64) -> Context<'a> {
        Context {
            storage,
            height,
            validators: self.validators.as_ref(),
            drivers: &self.drivers,
            fee_options: &self.fee_options,
            network: self.network,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Box<dyn Storage + Send + Sync>>, CustodyError> {
        self.storage
            .read()
            .map_err(|_| StdError::generic_err("state lock poisoned").into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn Storage + Send + Sync>>, CustodyError> {
        self.storage
            .write()
            .map_err(|_| StdError::generic_err("state lock poisoned").into())
    }
}

/// Cloneable read-only handle on committed state.
#[derive(Clone)]
pub struct StateReader {
    storage: SharedStorage,
}

impl StateReader {
    fn read(&self) -> Result<RwLockReadGuard<'_, Box<dyn Storage + Send + Sync>>, CustodyError> {
        self.storage
            .read()
            .map_err(|_| StdError::generic_err("state lock poisoned").into())
    }

    pub fn minted_balance(&self, owner: &Addr) -> Result<Uint128, CustodyError> {
        store::minted_balance(&**self.read()?, owner)
    }

    pub fn fee_pool(&self) -> Result<Uint128, CustodyError> {
        fee_pool(&**self.read()?)
    }

    pub fn list_trackers(&self, chain: ChainType) -> Result<Vec<Tracker>, CustodyError> {
        store::list_trackers(&**self.read()?, chain)
    }

    pub fn lock_script(&self, address: &str) -> Result<Option<Binary>, CustodyError> {
        store::load_lock_script(&**self.read()?, address)
    }

    /// Vault output a new lock must spend, if the vault has one.
    pub fn current_utxo(&self, tracker_name: &str) -> Result<Option<UtxoRef>, CustodyError> {
        Ok(self
            .get_tracker(ChainType::Bitcoin, tracker_name)?
            .current_utxo)
    }
}

impl TrackerReader for StateReader {
    fn get_tracker(&self, chain: ChainType, name: &str) -> Result<Tracker, CustodyError> {
        store::load_tracker(&**self.read()?, chain, name)
    }
}
