//! Wallet session.
//!
//! Holds the connected account in a `watch` channel so consumers can react
//! to connect, disconnect and account switches.

use tokio::sync::watch;
use tracing::info;

use mdash_core::{AccountId, ChainId};

use crate::ports::AccountProvider;

#[derive(Debug)]
pub struct Session {
    account: watch::Sender<Option<AccountId>>,
    chain: ChainId,
}

impl Session {
    pub fn new(chain: ChainId) -> Self {
        let (account, _) = watch::channel(None);
        Self { account, chain }
    }

    /// Connect or switch to `account`. Reconnecting the same account does
    /// not notify subscribers.
    pub fn connect(&self, account: AccountId) {
        let changed = self.account.send_if_modified(|current| {
            if current.as_ref() == Some(&account) {
                return false;
            }
            *current = Some(account.clone());
            true
        });
        if changed {
            info!(account = %account.short(), chain = %self.chain, "Wallet connected");
        }
    }

    pub fn disconnect(&self) {
        let changed = self.account.send_if_modified(|current| current.take().is_some());
        if changed {
            info!("Wallet disconnected");
        }
    }

    /// Watch account changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<AccountId>> {
        self.account.subscribe()
    }
}

impl AccountProvider for Session {
    fn current_account(&self) -> Option<AccountId> {
        self.account.borrow().clone()
    }

    fn current_chain(&self) -> ChainId {
        self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> AccountId {
        AccountId::parse(&format!("0x{}", format!("{n:02x}").repeat(20))).unwrap()
    }

    #[tokio::test]
    async fn test_connect_switch_disconnect() {
        let session = Session::new(ChainId::BERACHAIN);
        let mut rx = session.subscribe();
        assert!(session.current_account().is_none());

        session.connect(addr(1));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().clone(), Some(addr(1)));

        // Same account again: no notification.
        session.connect(addr(1));
        assert!(!rx.has_changed().unwrap());

        session.connect(addr(2));
        rx.changed().await.unwrap();
        assert_eq!(session.current_account(), Some(addr(2)));

        session.disconnect();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
        assert_eq!(session.current_chain(), ChainId::BERACHAIN);
    }

    #[test]
    fn test_disconnect_without_account_is_silent() {
        let session = Session::new(ChainId::BERACHAIN);
        let mut rx = session.subscribe();
        session.disconnect();
        assert!(!tokio_test::assert_ok!(rx.has_changed()));

        session.connect(addr(3));
        tokio_test::block_on(rx.changed()).unwrap();
        assert_eq!(session.current_account(), Some(addr(3)));
    }
}
