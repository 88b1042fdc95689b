//! Customer aggregate with contacts and addresses.
//!
//! Lives in the customer store, which may be a separate table. Keys come
//! from path parameters; bodies never carry `PK`/`SK`.
//!
//! Install contact links live in the main store, so deletes that would
//! strand them are refused after a read of those links. The read and the
//! delete cannot share a transaction across tables: a link committed in
//! between survives and lists as a `{ContactId}` stub until unlinked.

use super::{
    Context, ListOptions, cascade_delete, default_attr, list_aggregates, list_children, read_all,
    take_or_generate_id,
};
use crate::keys::{self, CUSTOMER_SK, EntityKind, SubKey, prefix};
use crate::link::LinkManager;
use crate::store::{Precondition, StoreError, TransactOp};
use crate::validate::{Mode, Schema, schemas};
use crate::{FleetError, Item, ItemKey, ListPage};
use serde_json::{Value, json};

/// Which kind of customer sub-entity an operation targets.
#[derive(Debug, Clone, Copy)]
enum Part {
    Contact,
    Address,
}

impl Part {
    fn label(self) -> &'static str {
        match self {
            Self::Contact => "Contact",
            Self::Address => "Address",
        }
    }

    fn id_attr(self) -> &'static str {
        match self {
            Self::Contact => "ContactId",
            Self::Address => "AddressId",
        }
    }

    fn schema(self) -> &'static Schema {
        match self {
            Self::Contact => &schemas::CONTACT,
            Self::Address => &schemas::ADDRESS,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Contact => prefix::CONTACT,
            Self::Address => prefix::ADDRESS,
        }
    }

    fn key(self, customer_id: &str, id: &str) -> ItemKey {
        let sub = match self {
            Self::Contact => SubKey::Contact {
                contact_id: id.to_string(),
            },
            Self::Address => SubKey::Address {
                address_id: id.to_string(),
            },
        };
        keys::child_key(EntityKind::Customer, customer_id, &sub)
    }
}

/// Orchestrates customer, contact and address operations.
#[derive(Debug, Clone)]
pub struct CustomerService {
    ctx: Context,
    links: LinkManager,
}

impl CustomerService {
    pub(crate) fn new(ctx: Context, links: LinkManager) -> Self {
        Self { ctx, links }
    }

    fn refuse_linked_contact(&self, customer_id: &str, contact_id: &str) -> Result<(), FleetError> {
        let installs = self.links.installs_linking_contact(customer_id, contact_id)?;
        if installs.is_empty() {
            return Ok(());
        }
        Err(FleetError::precondition(format!(
            "Contact {} is linked to installs: {}. Please unlink first.",
            contact_id,
            installs.join(", ")
        )))
    }

    // -------------------------------------------------------------------------
    // CUSTOMER
    // -------------------------------------------------------------------------

    /// Create a customer.
    pub fn create(&self, body: &Value) -> Result<Item, FleetError> {
        let mut fields = schemas::CUSTOMER
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let id = take_or_generate_id(&mut fields, "CustomerId");
        default_attr(&mut fields, "Status", "active");
        let now = self.ctx.now();
        fields.insert("CreatedDate".into(), json!(now));
        fields.insert("UpdatedDate".into(), json!(now));
        self.ctx
            .create_meta(EntityKind::Customer, &keys::customer_key(&id), &id, fields)
    }

    /// Customer record with its contacts and addresses.
    pub fn get(&self, id: &str) -> Result<Value, FleetError> {
        crate::link::check_id("customerId", id)?;
        let customer = self.ctx.require(&keys::customer_key(id), "Customer", id)?;
        let pk = keys::pk(EntityKind::Customer, id);
        let contacts = read_all(self.ctx.store(), &pk, prefix::CONTACT)?;
        let addresses = read_all(self.ctx.store(), &pk, prefix::ADDRESS)?;
        let mut view = customer.view();
        if let Value::Object(map) = &mut view {
            map.insert(
                "Contacts".into(),
                Value::Array(contacts.iter().map(Item::view).collect()),
            );
            map.insert(
                "Addresses".into(),
                Value::Array(addresses.iter().map(Item::view).collect()),
            );
        }
        Ok(view)
    }

    /// Patch customer attributes.
    pub fn update(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("customerId", id)?;
        let fields = schemas::CUSTOMER
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        self.ctx
            .patch_existing(&keys::customer_key(id), "Customer", id, fields, "UpdatedDate")
    }

    /// Delete a customer with its contacts and addresses. Refused while
    /// any of its contacts is linked to an install.
    pub fn delete(&self, id: &str) -> Result<usize, FleetError> {
        crate::link::check_id("customerId", id)?;
        let contacts = read_all(
            self.ctx.store(),
            &keys::pk(EntityKind::Customer, id),
            prefix::CONTACT,
        )?;
        for contact in &contacts {
            if let Some(contact_id) = contact.get_str("ContactId") {
                self.refuse_linked_contact(id, contact_id)?;
            }
        }
        cascade_delete(self.ctx.store(), &keys::customer_key(id), Precondition::MustExist)
            .map_err(|err| err.unwrap_or_else(|| FleetError::not_found("Customer", id)))
    }

    /// Page through customers.
    pub fn list(&self, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        list_aggregates(self.ctx.store(), EntityKind::Customer, CUSTOMER_SK, opts)
    }

    // -------------------------------------------------------------------------
    // CONTACTS / ADDRESSES
    // -------------------------------------------------------------------------

    fn create_part(&self, part: Part, customer_id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("customerId", customer_id)?;
        let mut fields = part
            .schema()
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let id = take_or_generate_id(&mut fields, part.id_attr());
        let mut item = Item::new(&part.key(customer_id, &id), &part.label().to_uppercase());
        for (name, value) in fields {
            item.set(&name, value);
        }
        item.set("CustomerId", json!(customer_id));
        item.set("CreatedDate", json!(self.ctx.now()));

        let ops = vec![
            TransactOp::put(item.clone(), Precondition::MustNotExist),
            TransactOp::check(keys::customer_key(customer_id), Precondition::MustExist),
        ];
        match self.ctx.store().transact(ops) {
            Ok(()) => Ok(item),
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                if err.failed_ops().contains(&1) {
                    Err(FleetError::not_found("Customer", customer_id))
                } else {
                    Err(FleetError::already_exists(&part.label().to_uppercase(), &id))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn missing_part(part: Part, customer_id: &str, id: &str) -> FleetError {
        FleetError::NotFound(format!(
            "{} {} not found for customer {}",
            part.label(),
            id,
            customer_id
        ))
    }

    fn delete_part(&self, part: Part, customer_id: &str, id: &str) -> Result<(), FleetError> {
        crate::link::check_id("customerId", customer_id)?;
        crate::link::check_id(part.id_attr(), id)?;
        match self
            .ctx
            .store()
            .delete(&part.key(customer_id, id), Precondition::MustExist)
        {
            Ok(_) => Ok(()),
            Err(StoreError::PreconditionFailed { .. }) => {
                Err(Self::missing_part(part, customer_id, id))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn list_parts(
        &self,
        part: Part,
        customer_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        crate::link::check_id("customerId", customer_id)?;
        self.ctx
            .require(&keys::customer_key(customer_id), "Customer", customer_id)?;
        list_children(
            self.ctx.store(),
            &keys::pk(EntityKind::Customer, customer_id),
            part.prefix(),
            opts,
        )
    }

    /// Add a contact to a customer.
    pub fn create_contact(&self, customer_id: &str, body: &Value) -> Result<Item, FleetError> {
        self.create_part(Part::Contact, customer_id, body)
    }

    /// One contact.
    pub fn get_contact(&self, customer_id: &str, contact_id: &str) -> Result<Value, FleetError> {
        crate::link::check_id("customerId", customer_id)?;
        crate::link::check_id("ContactId", contact_id)?;
        self.ctx
            .store()
            .get(&Part::Contact.key(customer_id, contact_id))?
            .map(|c| c.view())
            .ok_or_else(|| Self::missing_part(Part::Contact, customer_id, contact_id))
    }

    /// Patch a contact.
    pub fn update_contact(
        &self,
        customer_id: &str,
        contact_id: &str,
        body: &Value,
    ) -> Result<Item, FleetError> {
        crate::link::check_id("customerId", customer_id)?;
        crate::link::check_id("ContactId", contact_id)?;
        let fields = schemas::CONTACT
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        self.ctx
            .patch_existing(
                &Part::Contact.key(customer_id, contact_id),
                "Contact",
                contact_id,
                fields,
                "UpdatedDate",
            )
    }

    /// Remove a contact that no install links to.
    pub fn delete_contact(&self, customer_id: &str, contact_id: &str) -> Result<(), FleetError> {
        crate::link::check_id("customerId", customer_id)?;
        crate::link::check_id("ContactId", contact_id)?;
        self.refuse_linked_contact(customer_id, contact_id)?;
        self.delete_part(Part::Contact, customer_id, contact_id)
    }

    /// Page through a customer's contacts.
    pub fn list_contacts(
        &self,
        customer_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        self.list_parts(Part::Contact, customer_id, opts)
    }

    /// Add an address to a customer.
    pub fn create_address(&self, customer_id: &str, body: &Value) -> Result<Item, FleetError> {
        self.create_part(Part::Address, customer_id, body)
    }

    /// Remove an address.
    pub fn delete_address(&self, customer_id: &str, address_id: &str) -> Result<(), FleetError> {
        self.delete_part(Part::Address, customer_id, address_id)
    }

    /// Page through a customer's addresses.
    pub fn list_addresses(
        &self,
        customer_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        self.list_parts(Part::Address, customer_id, opts)
    }
}

// =============================================================================
// TESTS
// =============================================================================
