//! Wallet binding registry
//!
//! Maps each participant to the payout address they set. Bindings are
//! overwritten on every successful set and never removed.

use crate::error::ValidationError;
use crate::types::{Address, ParticipantId};
use std::collections::BTreeMap;

/// Serialized binding shape: `{ "<participant>": "<address>" }`
pub type WalletBindings = BTreeMap<ParticipantId, Address>;

/// Participant to address bindings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletRegistry {
    bindings: WalletBindings,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(bindings: WalletBindings) -> Self {
        Self { bindings }
    }

    /// Exact match against `^0x[0-9a-fA-F]{40}$`, no normalization
    pub fn validate(address: &str) -> bool {
        Address::is_valid(address)
    }

    /// Bind `participant` to `address`.
    ///
    /// An absent or blank argument is `NoAddressProvided`; anything that
    /// fails validation is `InvalidAddress`. The registry is unchanged on
    /// error.
    pub fn set_address(
        &mut self,
        participant: &ParticipantId,
        address: Option<&str>,
    ) -> Result<Address, ValidationError> {
        let raw = match address {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Err(ValidationError::NoAddressProvided),
        };
        let address = Address::parse(raw)?;

        if let Some(previous) = self.bindings.insert(participant.clone(), address.clone()) {
            if previous != address {
                tracing::debug!("{} rebound wallet {} -> {}", participant, previous, address);
            }
        }
        Ok(address)
    }

    pub fn get_address(&self, participant: &ParticipantId) -> Option<&Address> {
        self.bindings.get(participant)
    }

    pub fn replace_all(&mut self, bindings: WalletBindings) {
        self.bindings = bindings;
    }

    pub fn snapshot(&self) -> WalletBindings {
        self.bindings.clone()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE_WALLET: &str = "0x00000000000000000000000000000000000000a1";

    #[test]
    fn test_set_and_get() {
        let mut registry = WalletRegistry::new();
        let alice = ParticipantId::from("alice");

        let bound = registry.set_address(&alice, Some(ALICE_WALLET)).unwrap();
        assert_eq!(bound.as_str(), ALICE_WALLET);
        assert_eq!(registry.get_address(&alice), Some(&bound));
        assert_eq!(registry.get_address(&"bob".into()), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut registry = WalletRegistry::new();
        let alice = ParticipantId::from("alice");
        let second = format!("0x{}", "b".repeat(40));

        registry.set_address(&alice, Some(ALICE_WALLET)).unwrap();
        registry.set_address(&alice, Some(&second)).unwrap();

        assert_eq!(registry.get_address(&alice).unwrap().as_str(), second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_missing_address() {
        let mut registry = WalletRegistry::new();
        let alice = ParticipantId::from("alice");

        assert_eq!(
            registry.set_address(&alice, None),
            Err(ValidationError::NoAddressProvided)
        );
        assert_eq!(
            registry.set_address(&alice, Some("  ")),
            Err(ValidationError::NoAddressProvided)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejects_invalid_without_mutation() {
        let mut registry = WalletRegistry::new();
        let alice = ParticipantId::from("alice");
        registry.set_address(&alice, Some(ALICE_WALLET)).unwrap();

        let err = registry.set_address(&alice, Some("0x1234")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress(_)));
        assert_eq!(registry.get_address(&alice).unwrap().as_str(), ALICE_WALLET);
    }

    #[test]
    fn test_shared_address() {
        let mut registry = WalletRegistry::new();
        registry.set_address(&"alice".into(), Some(ALICE_WALLET)).unwrap();
        registry.set_address(&"bob".into(), Some(ALICE_WALLET)).unwrap();

        assert_eq!(
            registry.get_address(&"alice".into()),
            registry.get_address(&"bob".into())
        );
    }

    #[test]
    fn test_bindings_serialize_flat() {
        let mut registry = WalletRegistry::new();
        registry.set_address(&"alice".into(), Some(ALICE_WALLET)).unwrap();

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert_eq!(json, format!("{{\"alice\":\"{}\"}}", ALICE_WALLET));
    }
}
