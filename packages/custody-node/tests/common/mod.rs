//! Multi-validator harness.
//!
//! Every validator runs its own ledger replica, job store and scheduler over
//! a shared mempool and a shared mock chain driver. A commit applies the
//! drained mempool to every replica, the way a block reaches every node.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cosmwasm_std::Uint128;
use custody::fees::FeeOptions;
use custody::msg::Lock;
use custody::testing::{
    address_of, lock_tx, outpoint, signed_bytes, test_key, validator_for, validator_keys,
    MockChainDriver,
};
use custody::tx::{Fee, SignedTx};
use custody::validator::StaticValidatorSet;
use custody::{App, BitcoinNetwork, ChainDrivers, ChainType, Tracker, TrackerReader, TxResult};
use k256::ecdsa::SigningKey;
use sqlx::SqlitePool;

use custody_node::broadcast::{InternalBroadcast, MempoolBroadcaster};
use custody_node::db;
use custody_node::jobs::{JobContext, JobRegistry};
use custody_node::retry::BackoffPolicy;
use custody_node::{BlockExecutor, Mempool, Scheduler, SchedulerConfig, TickSummary};

pub const VAULT: &str = "v1";

pub fn user() -> SigningKey {
    test_key(200)
}

pub fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(5),
        batch_size: 100,
        backoff: BackoffPolicy {
            base: Duration::from_millis(200),
            cap: Duration::from_millis(400),
            factor: 2.0,
        },
    }
}

pub struct Replica {
    pub app: Arc<App>,
    pub db: SqlitePool,
    pub executor: BlockExecutor,
    pub ctx: Arc<JobContext>,
    pub scheduler: Scheduler,
}

pub struct Network {
    pub keys: Vec<SigningKey>,
    pub btc: Arc<MockChainDriver>,
    pub mempool: Arc<Mempool>,
    pub replicas: Vec<Replica>,
    pub height: u64,
}

impl Network {
    pub async fn new(validators: u8) -> Self {
        let keys = validator_keys(validators);
        let btc = Arc::new(MockChainDriver::new(ChainType::Bitcoin));
        let eth = Arc::new(MockChainDriver::new(ChainType::Ethereum));
        let drivers = ChainDrivers::new().with(btc.clone()).with(eth);
        let mempool = Arc::new(Mempool::new());

        let mut replicas = vec![];
        for key in &keys {
            let set = StaticValidatorSet::new(keys.iter().map(validator_for).collect());
            let app = Arc::new(App::new(
                Arc::new(set),
                drivers.clone(),
                FeeOptions::default(),
                BitcoinNetwork::Regtest,
            ));
            let db = db::memory_pool().await.unwrap();
            let broadcaster = Arc::new(MempoolBroadcaster::new(app.clone(), mempool.clone()));
            let ctx = Arc::new(
                JobContext::new(
                    key.clone(),
                    Arc::new(app.reader()),
                    drivers.clone(),
                    broadcaster,
                    BitcoinNetwork::Regtest,
                    "test-token",
                    Fee::default(),
                )
                .unwrap(),
            );
            let scheduler = Scheduler::new(
                db.clone(),
                JobRegistry::with_default_handlers(),
                ctx.clone(),
                fast_scheduler(),
            );
            replicas.push(Replica {
                executor: BlockExecutor::new(app.clone(), db.clone()),
                app,
                db,
                ctx,
                scheduler,
            });
        }

        Self {
            keys,
            btc,
            mempool,
            replicas,
            height: 0,
        }
    }

    pub fn init_vault(&self, name: &str) {
        for r in &self.replicas {
            r.app.init_vault(name).unwrap();
        }
    }

    /// Submit a user transaction through the first replica's ingress.
    pub async fn submit_user(&self, bytes: &[u8]) {
        let tx = SignedTx::decode(bytes).unwrap();
        let broadcaster =
            MempoolBroadcaster::new(self.replicas[0].app.clone(), self.mempool.clone());
        broadcaster.submit(&tx).await.unwrap();
    }

    pub async fn lock(&self, amount: u64) {
        let msg = Lock {
            locker: address_of(&user()),
            tracker_name: VAULT.to_string(),
            btc_tx: lock_tx(
                &self.replicas[0].app.vault_address().unwrap(),
                vec![outpoint("user-funding", 1)],
                amount,
            ),
            lock_amount: Uint128::new(amount as u128),
        };
        self.submit_user(&signed_bytes(&msg, &user(), "").unwrap()).await;
    }

    /// Apply everything pending to every replica; returns the first
    /// replica's results after checking all replicas agree.
    pub async fn commit(&mut self) -> Vec<TxResult> {
        self.height += 1;
        let txs = self.mempool.drain(usize::MAX);
        let mut all = vec![];
        for r in &self.replicas {
            all.push(r.executor.apply_block(self.height, &txs).await.unwrap());
        }
        let codes: Vec<Vec<u32>> = all
            .iter()
            .map(|rs| rs.iter().map(|r| r.code).collect())
            .collect();
        assert!(codes.windows(2).all(|w| w[0] == w[1]), "replicas diverged");
        all.swap_remove(0)
    }

    pub async fn tick_all(&self) -> Vec<TickSummary> {
        let mut out = vec![];
        for r in &self.replicas {
            out.push(r.scheduler.tick().await.unwrap());
        }
        out
    }

    /// Alternate ticks and commits until nothing is pending.
    pub async fn settle(&mut self, max_rounds: usize) {
        for _ in 0..max_rounds {
            self.tick_all().await;
            if self.mempool.is_empty() {
                return;
            }
            self.commit().await;
        }
    }

    pub fn tracker(&self, name: &str) -> Tracker {
        self.replicas[0]
            .app
            .reader()
            .get_tracker(ChainType::Bitcoin, name)
            .unwrap()
    }

    pub fn minted(&self) -> Uint128 {
        self.replicas[0]
            .app
            .reader()
            .minted_balance(&address_of(&user()))
            .unwrap()
    }
}

/// Lock `amount` and run the signing round until the vault is `Signed`.
pub async fn signed_vault(net: &mut Network, amount: u64) {
    net.init_vault(VAULT);
    net.lock(amount).await;
    net.commit().await;
    net.settle(10).await;
    assert_eq!(net.tracker(VAULT).state, custody::TrackerState::Signed);
}
