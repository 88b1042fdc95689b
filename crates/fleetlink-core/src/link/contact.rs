//! Install ↔ Contact links, scoped to the install's customer.

use super::{LinkManager, check_id};
use crate::keys::{self, EntityKind, SubKey, prefix};
use crate::primitives::MAX_PAGE_SIZE;
use crate::query::Query;
use crate::store::{Precondition, StoreError};
use crate::{Actor, FleetError, Item, ItemKey, ListPage};
use serde::Serialize;
use serde_json::{Value, json};

/// Whether `link_contact` created the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContactLinkStatus {
    #[serde(rename = "linked")]
    Linked,
    #[serde(rename = "already linked")]
    AlreadyLinked,
}

/// Result of `link_contact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactLinkOutcome {
    pub install_id: String,
    pub contact_id: String,
    pub customer_id: String,
    pub status: ContactLinkStatus,
}

fn contact_key(customer_id: &str, contact_id: &str) -> ItemKey {
    keys::child_key(
        EntityKind::Customer,
        customer_id,
        &SubKey::Contact {
            contact_id: contact_id.to_string(),
        },
    )
}

fn assoc_key(install_id: &str, contact_id: &str) -> ItemKey {
    keys::child_key(
        EntityKind::Install,
        install_id,
        &SubKey::ContactAssoc {
            contact_id: contact_id.to_string(),
        },
    )
}

impl LinkManager {
    fn install_customer(&self, install_id: &str) -> Result<String, FleetError> {
        check_id("installId", install_id)?;
        let install = self
            .store()
            .get(&keys::meta_key(EntityKind::Install, install_id))?
            .ok_or_else(|| FleetError::not_found("Install", install_id))?;
        install
            .get_str("CustomerId")
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                FleetError::precondition(format!("Install {} has no CustomerId", install_id))
            })
    }

    /// Link a contact of the install's customer to the install.
    ///
    /// Linking an already-linked contact succeeds with
    /// [`ContactLinkStatus::AlreadyLinked`].
    pub fn link_contact(
        &self,
        install_id: &str,
        contact_id: &str,
        actor: &Actor,
    ) -> Result<ContactLinkOutcome, FleetError> {
        check_id("contactId", contact_id)?;
        let customer_id = self.install_customer(install_id)?;
        let contact = self
            .customers
            .get(&contact_key(&customer_id, contact_id))?
            .ok_or_else(|| {
                FleetError::validation(format!(
                    "Contact {} does not belong to customer {}",
                    contact_id, customer_id
                ))
            })?;

        let mut assoc = Item::new(&assoc_key(install_id, contact_id), "CONTACT_ASSOC");
        assoc.set("InstallId", json!(install_id));
        assoc.set("ContactId", json!(contact_id));
        assoc.set("CustomerId", json!(customer_id));
        assoc.set(
            "ContactName",
            contact.get("ContactName").cloned().unwrap_or(Value::Null),
        );
        assoc.set("LinkedDate", json!(self.now_iso()));
        assoc.set("LinkedBy", json!(actor.performed_by));

        let status = match self.store().put(assoc, Precondition::MustNotExist) {
            Ok(()) => {
                tracing::info!(install_id, contact_id, "contact linked to install");
                ContactLinkStatus::Linked
            }
            Err(StoreError::Conflict(_)) => ContactLinkStatus::AlreadyLinked,
            Err(err) => return Err(err.into()),
        };
        Ok(ContactLinkOutcome {
            install_id: install_id.to_string(),
            contact_id: contact_id.to_string(),
            customer_id,
            status,
        })
    }

    /// Remove a contact association.
    pub fn unlink_contact(&self, install_id: &str, contact_id: &str) -> Result<(), FleetError> {
        check_id("installId", install_id)?;
        check_id("contactId", contact_id)?;
        match self
            .store()
            .delete(&assoc_key(install_id, contact_id), Precondition::MustExist)
        {
            Ok(_) => {
                tracing::info!(install_id, contact_id, "contact unlinked from install");
                Ok(())
            }
            Err(StoreError::PreconditionFailed { .. }) => Err(FleetError::NotFound(format!(
                "Contact {} is not linked to install {}",
                contact_id, install_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Installs that link contact `contact_id` of `customer_id`.
    pub fn installs_linking_contact(
        &self,
        customer_id: &str,
        contact_id: &str,
    ) -> Result<Vec<String>, FleetError> {
        let sk = SubKey::ContactAssoc {
            contact_id: contact_id.to_string(),
        }
        .encode();
        let mut installs = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store().fetch(
                &Query::scan(EntityKind::Install.pk_prefix(), sk.as_str())
                    .limit(MAX_PAGE_SIZE)
                    .after(cursor),
            )?;
            installs.extend(
                page.items
                    .iter()
                    .filter(|a| a.get_str("CustomerId") == Some(customer_id))
                    .filter_map(|a| a.get_str("InstallId").map(str::to_string)),
            );
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(installs),
            }
        }
    }

    /// Contacts linked to an install, joined with the contact records.
    pub fn list_contacts_for_install(
        &self,
        install_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage<Value>, FleetError> {
        let customer_id = self.install_customer(install_id)?;
        let page = self.store().query(
            &keys::pk(EntityKind::Install, install_id),
            Some(prefix::CONTACT_ASSOC),
            limit,
            cursor,
        )?;
        let contact_keys: Vec<ItemKey> = page
            .items
            .iter()
            .filter_map(|a| a.get_str("ContactId"))
            .map(|c| contact_key(&customer_id, c))
            .collect();
        let contacts = self.customers.batch_get(&contact_keys)?;

        let items = page
            .items
            .iter()
            .map(|assoc| {
                let contact_id = assoc.get_str("ContactId").unwrap_or_default();
                let mut view = contacts
                    .get(&contact_key(&customer_id, contact_id))
                    .map(Item::view)
                    .unwrap_or_else(|| json!({ "ContactId": contact_id }));
                if let Value::Object(map) = &mut view {
                    map.insert(
                        "linkedDate".into(),
                        assoc.get("LinkedDate").cloned().unwrap_or(Value::Null),
                    );
                    map.insert(
                        "linkedBy".into(),
                        assoc.get("LinkedBy").cloned().unwrap_or(Value::Null),
                    );
                }
                view
            })
            .collect();
        Ok(ListPage::new(items, page.next))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemClock;
    use crate::store::{ItemStore, MemoryStore};
    use std::sync::Arc;

    fn setup() -> LinkManager {
        let store = Arc::new(MemoryStore::new());
        let customers = Arc::new(MemoryStore::new());

        let mut install = Item::new(&keys::meta_key(EntityKind::Install, "INS001"), "INSTALL");
        install.set("CustomerId", json!("CUST1"));
        store.put(install, Precondition::None).expect("install");

        let mut contact = Item::new(&contact_key("CUST1", "K1"), "CONTACT");
        contact.set("ContactName", json!("Asha"));
        customers.put(contact, Precondition::None).expect("contact");
        customers
            .put(
                Item::new(&contact_key("CUST2", "K2"), "CONTACT"),
                Precondition::None,
            )
            .expect("foreign contact");

        LinkManager::new(store, customers, Arc::new(SystemClock::new()))
    }

    #[test]
    fn relinking_is_reported_not_failed() {
        let lm = setup();
        let first = lm.link_contact("INS001", "K1", &Actor::system()).expect("link");
        assert_eq!(first.status, ContactLinkStatus::Linked);
        let again = lm.link_contact("INS001", "K1", &Actor::system()).expect("relink");
        assert_eq!(again.status, ContactLinkStatus::AlreadyLinked);
    }

    #[test]
    fn contact_of_other_customer_is_rejected() {
        let lm = setup();
        let err = lm
            .link_contact("INS001", "K2", &Actor::system())
            .expect_err("foreign");
        assert_eq!(err.to_string(), "Contact K2 does not belong to customer CUST1");
    }

    #[test]
    fn list_and_unlink() {
        let lm = setup();
        lm.link_contact("INS001", "K1", &Actor::system()).expect("link");
        let page = lm.list_contacts_for_install("INS001", 10, None).expect("list");
        assert_eq!(page.items[0].get("ContactName"), Some(&json!("Asha")));

        lm.unlink_contact("INS001", "K1").expect("unlink");
        assert!(matches!(
            lm.unlink_contact("INS001", "K1"),
            Err(FleetError::NotFound(_))
        ));
    }
}
