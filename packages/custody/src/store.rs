//! Tracker store operations
//!
//! Thin typed layer over the storage maps. Only transaction handlers hold a
//! `&mut dyn Storage`; the background domain sees trackers through
//! [`TrackerReader`].

use cosmwasm_std::{Addr, Binary, Order, StdResult, Storage, Uint128};
use cw_storage_plus::Map;

use crate::error::CustodyError;
use crate::state::{Tracker, BTC_TRACKERS, ETH_TRACKERS, LOCK_SCRIPTS, MINTED};
use crate::validator::ChainType;

/// Read-only tracker access for code outside the consensus domain.
pub trait TrackerReader: Send + Sync {
    fn get_tracker(&self, chain: ChainType, name: &str) -> Result<Tracker, CustodyError>;
}

fn trackers<'k>(chain: ChainType) -> Map<'static, &'k str, Tracker> {
    match chain {
        ChainType::Bitcoin => BTC_TRACKERS,
        ChainType::Ethereum => ETH_TRACKERS,
    }
}

pub fn load_tracker(
    storage: &dyn Storage,
    chain: ChainType,
    name: &str,
) -> Result<Tracker, CustodyError> {
    trackers(chain)
        .may_load(storage, name)?
        .ok_or_else(|| CustodyError::TrackerNotFound {
            name: name.to_string(),
        })
}

/// Load a tracker that must be free to start a new operation.
pub fn load_available_tracker(
    storage: &dyn Storage,
    chain: ChainType,
    name: &str,
) -> Result<Tracker, CustodyError> {
    let tracker = load_tracker(storage, chain, name)?;
    if !tracker.is_available() {
        return Err(CustodyError::TrackerBusy {
            name: name.to_string(),
            state: tracker.state.to_string(),
        });
    }
    Ok(tracker)
}

pub fn save_tracker(storage: &mut dyn Storage, tracker: &Tracker) -> Result<(), CustodyError> {
    trackers(tracker.chain).save(storage, tracker.name.as_str(), tracker)?;
    Ok(())
}

/// Insert a tracker that must not exist yet.
pub fn create_tracker(storage: &mut dyn Storage, tracker: &Tracker) -> Result<(), CustodyError> {
    if trackers(tracker.chain).has(storage, tracker.name.as_str()) {
        return Err(CustodyError::TrackerExists {
            name: tracker.name.clone(),
        });
    }
    save_tracker(storage, tracker)
}

/// Bootstrap an empty Bitcoin vault so it can accept its first lock.
pub fn init_vault(storage: &mut dyn Storage, name: &str) -> Result<Tracker, CustodyError> {
    if name.is_empty() {
        return Err(CustodyError::MissingData {
            field: "tracker_name".to_string(),
        });
    }
    let tracker = Tracker::new_vault(name);
    create_tracker(storage, &tracker)?;
    Ok(tracker)
}

pub fn list_trackers(storage: &dyn Storage, chain: ChainType) -> Result<Vec<Tracker>, CustodyError> {
    let trackers = trackers(chain)
        .range(storage, None, None, Order::Ascending)
        .map(|item| item.map(|(_, t)| t))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(trackers)
}

pub fn save_lock_script(
    storage: &mut dyn Storage,
    address: &str,
    script: &Binary,
) -> Result<(), CustodyError> {
    LOCK_SCRIPTS.save(storage, address, script)?;
    Ok(())
}

pub fn load_lock_script(storage: &dyn Storage, address: &str) -> Result<Option<Binary>, CustodyError> {
    Ok(LOCK_SCRIPTS.may_load(storage, address)?)
}

/// Credit the home-ledger representation of locked funds.
pub fn mint(storage: &mut dyn Storage, owner: &Addr, amount: Uint128) -> Result<Uint128, CustodyError> {
    let balance = MINTED.update(storage, owner, |b| -> StdResult<_> {
        Ok(b.unwrap_or_default().checked_add(amount)?)
    })?;
    Ok(balance)
}

pub fn minted_balance(storage: &dyn Storage, owner: &Addr) -> Result<Uint128, CustodyError> {
    Ok(MINTED.may_load(storage, owner)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TrackerState;
    use cosmwasm_std::MemoryStorage;

    #[test]
    fn test_init_vault_and_load() {
        let mut storage = MemoryStorage::new();
        init_vault(&mut storage, "v1").unwrap();

        let t = load_tracker(&storage, ChainType::Bitcoin, "v1").unwrap();
        assert_eq!(t.state, TrackerState::Available);
        assert!(t.current_utxo.is_none());

        assert!(matches!(
            init_vault(&mut storage, "v1"),
            Err(CustodyError::TrackerExists { .. })
        ));
        assert!(matches!(
            load_tracker(&storage, ChainType::Ethereum, "v1"),
            Err(CustodyError::TrackerNotFound { .. })
        ));
    }

    #[test]
    fn test_busy_tracker_not_available() {
        let mut storage = MemoryStorage::new();
        let mut t = init_vault(&mut storage, "v1").unwrap();
        t.state = TrackerState::Requested;
        save_tracker(&mut storage, &t).unwrap();

        let err = load_available_tracker(&storage, ChainType::Bitcoin, "v1").unwrap_err();
        assert_eq!(
            err,
            CustodyError::TrackerBusy {
                name: "v1".to_string(),
                state: "requested".to_string()
            }
        );
    }

    #[test]
    fn test_list_trackers_ordered() {
        let mut storage = MemoryStorage::new();
        for name in ["b", "a", "c"] {
            init_vault(&mut storage, name).unwrap();
        }
        let names: Vec<_> = list_trackers(&storage, ChainType::Bitcoin)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_mint_accumulates() {
        let mut storage = MemoryStorage::new();
        let owner = Addr::unchecked("alice");
        mint(&mut storage, &owner, Uint128::new(1000)).unwrap();
        mint(&mut storage, &owner, Uint128::new(500)).unwrap();
        assert_eq!(minted_balance(&storage, &owner).unwrap(), Uint128::new(1500));
        assert_eq!(
            minted_balance(&storage, &Addr::unchecked("bob")).unwrap(),
            Uint128::zero()
        );
    }
}
