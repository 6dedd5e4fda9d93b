//! Ethereum redeem tests.

mod common;

use cosmwasm_std::{Binary, Uint128};

use custody::error::CustodyError;
use custody::msg::Redeem;
use custody::testing::{address_of, redeem_payload, TestChain};
use custody::{ChainType, TrackerReader, TrackerState};

use common::{deliver, user};

fn redeem(payload: Option<Binary>) -> Redeem {
    Redeem {
        owner: address_of(&user()),
        to: "0x00000000000000000000000000000000000000aa".to_string(),
        eth_tx: payload,
    }
}

#[test]
fn test_redeem_creates_new_tracker() {
    let chain = TestChain::new(4);
    let payload = redeem_payload("0xaa", 2500);

    let res = deliver(&chain, &redeem(Some(payload.clone())), &user());
    assert!(res.is_ok(), "{}", res.log);
    assert_eq!(res.info, "Transaction received, redeem in progress");
    assert!(res.jobs.is_empty());

    let trackers = chain.app.reader().list_trackers(ChainType::Ethereum).unwrap();
    assert_eq!(trackers.len(), 1);
    let t = &trackers[0];
    assert_eq!(t.state, TrackerState::New);
    assert_eq!(t.process_owner, Some(address_of(&user())));
    assert_eq!(t.process_balance, Uint128::new(2500));
    assert_eq!(t.signed_redeem_tx, Some(payload));

    let multisig = t.multisig.as_ref().unwrap();
    assert_eq!(multisig.signers.len(), 4);
    assert_eq!(multisig.threshold, 3);
    assert!(multisig.address.starts_with("0x"));

    // keyed by the redemption hash
    let by_hash = chain
        .app
        .reader()
        .get_tracker(ChainType::Ethereum, &t.name)
        .unwrap();
    assert_eq!(&by_hash, t);
}

#[test]
fn test_unparseable_redeem_is_invalid_amount() {
    let chain = TestChain::new(4);
    let res = deliver(
        &chain,
        &redeem(Some(Binary::from(b"\xde\xad\xbe\xef".to_vec()))),
        &user(),
    );
    assert_eq!(
        res.code,
        CustodyError::InvalidAmount {
            reason: String::new()
        }
        .code()
    );
    assert!(chain
        .app
        .reader()
        .list_trackers(ChainType::Ethereum)
        .unwrap()
        .is_empty());
}

#[test]
fn test_zero_redeem_is_invalid_amount() {
    let chain = TestChain::new(1);
    let res = deliver(&chain, &redeem(Some(redeem_payload("0xaa", 0))), &user());
    assert_eq!(
        res.code,
        CustodyError::InvalidAmount {
            reason: String::new()
        }
        .code()
    );
}

#[test]
fn test_missing_payload_is_malformed() {
    let chain = TestChain::new(1);
    for payload in [None, Some(Binary::default())] {
        let res = deliver(&chain, &redeem(payload), &user());
        assert_eq!(
            res.code,
            CustodyError::MissingData {
                field: String::new()
            }
            .code()
        );
    }
}

#[test]
fn test_duplicate_redeem_rejected() {
    let chain = TestChain::new(1);
    let payload = redeem_payload("0xaa", 10);
    assert!(deliver(&chain, &redeem(Some(payload.clone())), &user()).is_ok());

    let res = deliver(&chain, &redeem(Some(payload)), &user());
    assert_eq!(
        res.code,
        CustodyError::TrackerExists {
            name: String::new()
        }
        .code()
    );
    assert_eq!(
        chain
            .app
            .reader()
            .list_trackers(ChainType::Ethereum)
            .unwrap()
            .len(),
        1
    );
}
