//! Bill target resolution
//!
//! Decides which external accounting customer an entity's invoice is issued
//! against. Ownership is a single hop by schema, so resolution never recurses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use core_kernel::BillingEntityId;
use crate::timesheet::BillingEntity;

/// Where a resolved target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSource {
    /// The entity's own accounting id
    #[serde(rename = "self")]
    OwnAccount,
    /// The owning entity's accounting id
    Owner,
}

/// The resolved billing target of an entity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillTarget {
    pub target: Option<String>,
    pub source: Option<TargetSource>,
}

impl BillTarget {
    /// No target: the entity cannot be invoiced
    pub fn none() -> Self {
        Self::default()
    }

    fn from_account(account: Option<&str>, source: TargetSource) -> Self {
        match account.map(str::trim).filter(|a| !a.is_empty()) {
            Some(account) => Self {
                target: Some(account.to_string()),
                source: Some(source),
            },
            None => Self::none(),
        }
    }

    /// Returns true when an invoice can be issued
    pub fn is_billable(&self) -> bool {
        self.target.is_some()
    }
}

/// Resolves an entity against its owner
///
/// `owner` is only consulted when its id matches `entity.owner_entity_id`, so
/// a mismatched lookup can never yield a third entity's account.
pub fn resolve(entity: &BillingEntity, owner: Option<&BillingEntity>) -> BillTarget {
    if entity.is_billing_owner || entity.bill_direct {
        return BillTarget::from_account(
            entity.external_accounting_id.as_deref(),
            TargetSource::OwnAccount,
        );
    }

    let owner = match (entity.owner_entity_id, owner) {
        (Some(owner_id), Some(owner)) if owner.id == owner_id => owner,
        _ => return BillTarget::none(),
    };

    BillTarget::from_account(owner.external_accounting_id.as_deref(), TargetSource::Owner)
}

/// Resolver over a directory of known entities
#[derive(Debug, Clone, Default)]
pub struct BillTargetResolver {
    entities: HashMap<BillingEntityId, BillingEntity>,
}

impl BillTargetResolver {
    /// Builds a resolver from the entities (and their owners) in scope
    pub fn new(entities: impl IntoIterator<Item = BillingEntity>) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    /// Looks up an entity by id
    pub fn entity(&self, id: BillingEntityId) -> Option<&BillingEntity> {
        self.entities.get(&id)
    }

    /// Resolves an entity, following its owner reference exactly once
    pub fn resolve(&self, entity: &BillingEntity) -> BillTarget {
        let owner = entity.owner_entity_id.and_then(|id| self.entities.get(&id));
        resolve(entity, owner)
    }

    /// Resolves an entity by id; unknown ids have no target
    pub fn resolve_id(&self, id: BillingEntityId) -> BillTarget {
        self.entity(id)
            .map(|entity| self.resolve(entity))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: i64) -> BillingEntity {
        BillingEntity::new(BillingEntityId::new(id), format!("Company {}", id))
    }

    #[test]
    fn test_owner_hop() {
        let owner = entity(2).with_accounting_id("117");
        let child = entity(1).owned_by(owner.id);
        let resolver = BillTargetResolver::new([owner, child.clone()]);

        let target = resolver.resolve(&child);
        assert_eq!(target.target.as_deref(), Some("117"));
        assert_eq!(target.source, Some(TargetSource::Owner));
    }

    #[test]
    fn test_billing_owner_ignores_bill_direct_and_owner() {
        let other = entity(9).with_accounting_id("999");
        let owner = entity(3)
            .with_accounting_id("300")
            .as_billing_owner()
            .owned_by(other.id)
            .with_bill_direct(false);
        let resolver = BillTargetResolver::new([other, owner.clone()]);

        let target = resolver.resolve(&owner);
        assert_eq!(target.target.as_deref(), Some("300"));
        assert_eq!(target.source, Some(TargetSource::OwnAccount));
    }

    #[test]
    fn test_bill_direct_overrides_hop() {
        let owner = entity(2).with_accounting_id("117");
        let child = entity(1)
            .with_accounting_id("55")
            .owned_by(owner.id)
            .with_bill_direct(true);

        let target = resolve(&child, Some(&owner));
        assert_eq!(target.target.as_deref(), Some("55"));
        assert_eq!(target.source, Some(TargetSource::OwnAccount));
    }

    #[test]
    fn test_missing_accounting_id_yields_no_target() {
        let owner = entity(2);
        let child = entity(1).owned_by(owner.id);
        assert_eq!(resolve(&child, Some(&owner)), BillTarget::none());

        let blank = entity(4).with_accounting_id("   ").as_billing_owner();
        assert!(!resolve(&blank, None).is_billable());
    }

    #[test]
    fn test_mismatched_owner_is_ignored() {
        let stranger = entity(7).with_accounting_id("777");
        let child = entity(1).owned_by(BillingEntityId::new(2));
        assert_eq!(resolve(&child, Some(&stranger)), BillTarget::none());
    }

    #[test]
    fn test_source_serializes_as_self() {
        let json = serde_json::to_string(&TargetSource::OwnAccount).unwrap();
        assert_eq!(json, "\"self\"");
    }
}
