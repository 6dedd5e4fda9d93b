//! Bitcoin lock lifecycle tests.
//!
//! Covers vault bootstrap, the continuity rule on first and later locks,
//! tracker exclusivity, and that every rejection leaves state untouched.

mod common;

use cosmwasm_std::Uint128;

use custody::driver::Utxo;
use custody::error::CustodyError;
use custody::testing::{lock_tx, outpoint, signed_bytes, test_key, MockTx, TestChain};
use custody::{Job, TrackerState};

use common::*;

fn code_of(err: CustodyError) -> u32 {
    err.code()
}

// ============================================================================
// First Lock
// ============================================================================

#[test]
fn test_first_lock_moves_vault_to_requested() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();

    let res = first_lock(&chain, 1000);
    assert!(res.is_ok(), "{}", res.log);
    assert_eq!(res.jobs, vec![Job::add_signature(VAULT, 1)]);

    let t = tracker(&chain, VAULT);
    assert_eq!(t.state, TrackerState::Requested);
    assert_eq!(t.process_balance, Uint128::new(1000));
    assert_eq!(t.current_balance, Uint128::zero());
    assert_eq!(t.process_owner, Some(custody::testing::address_of(&user())));
    assert_eq!(t.round, 1);

    let multisig = t.multisig.unwrap();
    assert_eq!(multisig.threshold, 3);
    assert_eq!(multisig.signers.len(), 4);
    assert_eq!(t.next_lock_script_address, Some(multisig.address.clone()));
    assert_eq!(
        chain.app.reader().lock_script(&multisig.address).unwrap(),
        Some(multisig.script)
    );
}

#[test]
fn test_first_lock_output_must_match_amount() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();

    let btc_tx = lock_tx(&vault_address(&chain), vec![outpoint("user-funding", 1)], 999);
    let res = deliver(&chain, &lock_msg(&user(), VAULT, btc_tx, 1000), &user());
    assert_eq!(
        res.code,
        code_of(CustodyError::TrackerMismatch { reason: String::new() })
    );
    assert!(res.jobs.is_empty());

    let t = tracker(&chain, VAULT);
    assert_eq!(t.state, TrackerState::Available);
    assert_eq!(t.process_balance, Uint128::zero());
    assert_eq!(t.round, 0);
}

#[test]
fn test_lock_paying_outside_multisig_rejected() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();

    let btc_tx = lock_tx("bcrt1qlockerownaddress", vec![outpoint("user-funding", 1)], 1000);
    let bytes = signed_bytes(&lock_msg(&user(), VAULT, btc_tx, 1000), &user(), "").unwrap();

    let checked = chain.app.check_tx(&bytes);
    assert_eq!(
        checked.code,
        code_of(CustodyError::TrackerMismatch { reason: String::new() })
    );

    let res = chain.app.deliver_tx(1, &bytes);
    assert_eq!(res.code, checked.code);
    assert!(res.jobs.is_empty());

    let t = tracker(&chain, VAULT);
    assert_eq!(t.state, TrackerState::Available);
    assert_eq!(t.round, 0);
    assert!(t.multisig.is_none());
    assert_eq!(
        chain
            .app
            .reader()
            .minted_balance(&custody::testing::address_of(&user()))
            .unwrap(),
        Uint128::zero()
    );

    // the same lock paying the multisig goes through
    assert!(first_lock(&chain, 1000).is_ok());
    assert_eq!(
        tracker(&chain, VAULT).multisig.unwrap().address,
        chain.app.vault_address().unwrap()
    );
}

#[test]
fn test_lock_unknown_tracker_not_found() {
    let chain = TestChain::new(1);
    let res = first_lock(&chain, 1000);
    assert_eq!(
        res.code,
        code_of(CustodyError::TrackerNotFound { name: String::new() })
    );
}

#[test]
fn test_lock_zero_amount_rejected() {
    let chain = TestChain::new(1);
    chain.app.init_vault(VAULT).unwrap();
    let btc_tx = lock_tx(&vault_address(&chain), vec![outpoint("user-funding", 1)], 0);
    let res = deliver(&chain, &lock_msg(&user(), VAULT, btc_tx, 0), &user());
    assert_eq!(
        res.code,
        code_of(CustodyError::InvalidAmount { reason: String::new() })
    );
}

#[test]
fn test_lock_signed_by_someone_else_unauthorized() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();

    let btc_tx = lock_tx(&vault_address(&chain), vec![outpoint("user-funding", 1)], 1000);
    let mallory = test_key(201);
    let res = deliver(&chain, &lock_msg(&user(), VAULT, btc_tx, 1000), &mallory);
    assert_eq!(
        res.code,
        code_of(CustodyError::Unauthorized {
            signer: String::new(),
            declared: String::new()
        })
    );
    assert_eq!(tracker(&chain, VAULT).state, TrackerState::Available);
}

#[test]
fn test_undecodable_btc_tx_is_malformed() {
    let chain = TestChain::new(1);
    chain.app.init_vault(VAULT).unwrap();
    let res = deliver(
        &chain,
        &lock_msg(&user(), VAULT, b"not a tx".to_vec().into(), 1000),
        &user(),
    );
    assert_eq!(
        res.code,
        code_of(CustodyError::Unserializable { reason: String::new() })
    );
}

#[test]
fn test_garbage_bytes_rejected_without_panic() {
    let chain = TestChain::new(1);
    let res = chain.app.deliver_tx(1, b"\x00\x01garbage");
    assert!(!res.is_ok());
    assert!(!res.log.is_empty());
    let res = chain.app.check_tx(b"{}");
    assert!(!res.is_ok());
}

// ============================================================================
// Exclusivity
// ============================================================================

#[test]
fn test_second_lock_while_busy_rejected() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();
    assert!(first_lock(&chain, 1000).is_ok());

    let btc_tx = lock_tx(&vault_address(&chain), vec![outpoint("other-funding", 0)], 500);
    let res = deliver(&chain, &lock_msg(&user(), VAULT, btc_tx, 500), &user());
    assert_eq!(
        res.code,
        code_of(CustodyError::TrackerBusy {
            name: String::new(),
            state: String::new()
        })
    );

    let t = tracker(&chain, VAULT);
    assert_eq!(t.state, TrackerState::Requested);
    assert_eq!(t.process_balance, Uint128::new(1000));
    assert_eq!(t.round, 1);
}

#[test]
fn test_check_tx_never_mutates() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();

    let btc_tx = lock_tx(&vault_address(&chain), vec![outpoint("user-funding", 1)], 1000);
    let bytes = signed_bytes(&lock_msg(&user(), VAULT, btc_tx, 1000), &user(), "").unwrap();

    let res = chain.app.check_tx(&bytes);
    assert!(res.is_ok(), "{}", res.log);
    assert!(res.jobs.is_empty());
    assert_eq!(tracker(&chain, VAULT).state, TrackerState::Available);

    // same bytes still deliverable after check
    assert!(chain.app.deliver_tx(1, &bytes).is_ok());
}

#[test]
fn test_zero_validators_rejects_without_state_change() {
    let chain = TestChain::new(0);
    chain.app.init_vault(VAULT).unwrap();

    let res = first_lock(&chain, 1000);
    assert_eq!(res.code, code_of(CustodyError::InsufficientValidators));
    assert_eq!(tracker(&chain, VAULT).state, TrackerState::Available);
}

// ============================================================================
// Continuity
// ============================================================================

#[tokio::test]
async fn test_second_lock_must_spend_vault_output() {
    let chain = TestChain::new(4);
    chain.app.init_vault(VAULT).unwrap();
    assert!(first_lock(&chain, 1000).is_ok());
    complete_round(&chain, VAULT).await;

    let t = tracker(&chain, VAULT);
    assert_eq!(t.current_balance, Uint128::new(1000));
    let vault_utxo = t.current_utxo.clone().unwrap();
    assert_eq!(vault_utxo.index, 0);

    // wrong prior output hash
    let wrong = lock_tx(
        &vault_address(&chain),
        vec![outpoint("not-the-vault", 0), outpoint("funding-2", 0)],
        1500,
    );
    let res = deliver(&chain, &lock_msg(&user(), VAULT, wrong, 500), &user());
    assert_eq!(
        res.code,
        code_of(CustodyError::TrackerMismatch { reason: String::new() })
    );
    let after = tracker(&chain, VAULT);
    assert_eq!(after.state, TrackerState::Available);
    assert_eq!(after.current_balance, Uint128::new(1000));
    assert_eq!(after.round, t.round);

    // right hash, wrong index
    let wrong_index = lock_tx(
        &vault_address(&chain),
        vec![outpoint(&vault_utxo.tx_id, 1), outpoint("funding-2", 0)],
        1500,
    );
    let res = deliver(&chain, &lock_msg(&user(), VAULT, wrong_index, 500), &user());
    assert!(!res.is_ok());

    // built by the driver from the vault's current output
    let next = chain
        .app
        .prepare_lock(
            VAULT,
            &Utxo {
                outpoint: outpoint("funding-2", 0),
                value: 500,
            },
        )
        .unwrap();
    let decoded = MockTx::decode(next.as_slice()).unwrap();
    assert_eq!(decoded.inputs[0], vault_utxo);
    assert_eq!(decoded.outputs[0].value, 1500);

    let res = deliver(&chain, &lock_msg(&user(), VAULT, next, 500), &user());
    assert!(res.is_ok(), "{}", res.log);
    assert_eq!(res.jobs, vec![Job::add_signature(VAULT, 2)]);

    let t = tracker(&chain, VAULT);
    assert_eq!(t.state, TrackerState::Requested);
    assert_eq!(t.process_balance, Uint128::new(1500));
}

#[test]
fn test_fee_collected_even_when_deliver_fails() {
    let chain = TestChain::new(0);
    chain.app.init_vault(VAULT).unwrap();

    let btc_tx = lock_tx(&vault_address(&chain), vec![outpoint("user-funding", 1)], 1000);
    let mut raw = custody::tx::RawTx::new(
        custody::tx::TxKind::BtcLock,
        custody::msg::TxMsg::encode(&lock_msg(&user(), VAULT, btc_tx, 1000)).unwrap(),
        custody::tx::Fee {
            amount: Uint128::new(7),
            gas: 0,
        },
        "",
    );
    raw.memo = "fee test".to_string();
    let bytes = custody::tx::sign_tx(raw, &[&user()])
        .unwrap()
        .encode()
        .unwrap();

    let res = chain.app.deliver_tx(1, &bytes);
    assert_eq!(res.code, code_of(CustodyError::InsufficientValidators));
    assert!(res.gas_used > 0);
    assert_eq!(chain.app.reader().fee_pool().unwrap(), Uint128::new(7));
    assert_eq!(tracker(&chain, VAULT).state, TrackerState::Available);
}
