//! Shared helpers for the flow tests.
#![allow(dead_code)]

use cosmwasm_std::{Binary, Uint128};
use k256::ecdsa::SigningKey;

use custody::driver::ChainDriver;
use custody::msg::{AddSignature, Lock, ReportFinalityMint, TxMsg};
use custody::testing::{address_of, lock_tx, outpoint, signed_bytes, test_key, TestChain};
use custody::{ChainType, Tracker, TrackerReader, TrackerState, TxResult};

pub const VAULT: &str = "v1";

pub fn user() -> SigningKey {
    test_key(200)
}

pub fn deliver<M: TxMsg>(chain: &TestChain, msg: &M, key: &SigningKey) -> TxResult {
    let bytes = signed_bytes(msg, key, "").unwrap();
    chain.app.deliver_tx(1, &bytes)
}

pub fn tracker(chain: &TestChain, name: &str) -> Tracker {
    chain
        .app
        .reader()
        .get_tracker(ChainType::Bitcoin, name)
        .unwrap()
}

pub fn lock_msg(user: &SigningKey, tracker: &str, btc_tx: Binary, amount: u128) -> Lock {
    Lock {
        locker: address_of(user),
        tracker_name: tracker.to_string(),
        btc_tx,
        lock_amount: Uint128::new(amount),
    }
}

/// Multisig address locks pay to; empty when the validator set is.
pub fn vault_address(chain: &TestChain) -> String {
    chain.app.vault_address().unwrap_or_default()
}

/// First lock of `amount` into a fresh vault.
pub fn first_lock(chain: &TestChain, amount: u64) -> TxResult {
    let btc_tx = lock_tx(&vault_address(chain), vec![outpoint("user-funding", 1)], amount);
    deliver(chain, &lock_msg(&user(), VAULT, btc_tx, amount as u128), &user())
}

/// Every validator co-signs in order until the tracker is `Signed`.
pub async fn sign_round(chain: &TestChain, name: &str) -> Vec<TxResult> {
    let mut results = vec![];
    for (i, key) in chain.keys.iter().enumerate() {
        let t = tracker(chain, name);
        if t.state == TrackerState::Signed {
            break;
        }
        let multisig = t.multisig.clone().unwrap();
        let base = t.process_tx.clone().or(t.process_unsigned_tx.clone()).unwrap();
        let outcome = chain
            .btc
            .add_signature(base.as_slice(), &multisig, key)
            .await
            .unwrap();
        let msg = AddSignature {
            tracker_name: name.to_string(),
            validator: chain.validator(i),
            signed_tx: outcome.tx,
            signature_count: multisig.signed_count(),
        };
        let res = deliver(chain, &msg, key);
        assert!(res.is_ok(), "signature {} rejected: {}", i, res.log);
        results.push(res);
    }
    results
}

pub fn report_msg(chain: &TestChain, i: usize, name: &str) -> ReportFinalityMint {
    ReportFinalityMint {
        tracker_name: name.to_string(),
        owner: tracker(chain, name).process_owner.unwrap(),
        validator: chain.validator(i),
        random_bytes: Binary::from(vec![i as u8; 4]),
    }
}

/// Every validator votes in order until the tracker leaves `Signed`.
pub fn report_round(chain: &TestChain, name: &str) -> Vec<TxResult> {
    let mut results = vec![];
    for (i, key) in chain.keys.iter().enumerate() {
        if tracker(chain, name).state != TrackerState::Signed {
            break;
        }
        let res = deliver(chain, &report_msg(chain, i, name), key);
        assert!(res.is_ok(), "vote {} rejected: {}", i, res.log);
        results.push(res);
    }
    results
}

/// Run one full lock round to completion.
pub async fn complete_round(chain: &TestChain, name: &str) {
    sign_round(chain, name).await;
    report_round(chain, name);
    assert_eq!(tracker(chain, name).state, TrackerState::Available);
}
