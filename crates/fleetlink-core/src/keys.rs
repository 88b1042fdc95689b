//! # Key Codec
//!
//! Deterministic construction and parsing of composite keys.
//!
//! Partition keys have the form `ENTITY#ID`; sort keys are either `META`
//! or `SUBENTITY#PART[#PART...]`. Parts never contain `#` or whitespace,
//! which [`validate_part`] enforces at ingress, so every encoded key
//! parses back to the value it came from.

use crate::ItemKey;
use crate::primitives::{KEY_SEPARATOR, LOCK_SK, META_SK};

/// Sort-key prefixes of every sub-entity kind.
pub mod prefix {
    pub const CONFIG: &str = "CONFIG#";
    pub const REPAIR: &str = "REPAIR#";
    pub const INSTALL_ASSOC: &str = "INSTALL_ASSOC#";
    pub const SIM_ASSOC: &str = "SIM_ASSOC#";
    pub const RUNTIME: &str = "RUNTIME#";
    pub const DEVICE_ASSOC: &str = "DEVICE_ASSOC#";
    pub const CONTACT_ASSOC: &str = "CONTACT_ASSOC#";
    pub const DEVICE_HISTORY: &str = "DEVICE_HISTORY#";
    pub const CONTACT: &str = "ENTITY#CONTACT#";
    pub const ADDRESS: &str = "ENTITY#ADDRESS#";
    pub const IMAGE: &str = "IMAGE#";
}

/// Sort key of a customer's own record.
pub const CUSTOMER_SK: &str = "ENTITY#CUSTOMER";

// =============================================================================
// ENTITY KIND
// =============================================================================

/// Kind of a partition. The upper-case tag is both the `PK` prefix and the
/// `EntityType` of the partition's metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Device,
    Sim,
    Install,
    Customer,
    Survey,
    RegionLock,
    State,
    District,
    Mandal,
    Village,
    Habitation,
}

impl EntityKind {
    /// Region hierarchy, outermost first.
    pub const REGIONS: [EntityKind; 5] = [
        Self::State,
        Self::District,
        Self::Mandal,
        Self::Village,
        Self::Habitation,
    ];

    /// Upper-case tag used in keys and `EntityType`.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Device => "DEVICE",
            Self::Sim => "SIM",
            Self::Install => "INSTALL",
            Self::Customer => "CUSTOMER",
            Self::Survey => "SURVEY",
            Self::RegionLock => "REGION_LOCK",
            Self::State => "STATE",
            Self::District => "DISTRICT",
            Self::Mandal => "MANDAL",
            Self::Village => "VILLAGE",
            Self::Habitation => "HABITATION",
        }
    }

    /// Human-readable name used in messages ("Device DEV1 not found").
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::Sim => "SIM",
            Self::Install => "Install",
            Self::Customer => "Customer",
            Self::Survey => "Survey",
            Self::RegionLock => "Region lock",
            Self::State => "State",
            Self::District => "District",
            Self::Mandal => "Mandal",
            Self::Village => "Village",
            Self::Habitation => "Habitation",
        }
    }

    /// Parse an upper-case tag. Region types are accepted case-insensitively
    /// since they also arrive as path segments.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        let upper = tag.to_ascii_uppercase();
        [
            Self::Device,
            Self::Sim,
            Self::Install,
            Self::Customer,
            Self::Survey,
            Self::RegionLock,
        ]
        .into_iter()
        .find(|k| k.tag() == tag)
        .or_else(|| Self::REGIONS.into_iter().find(|k| k.tag() == upper))
    }

    /// True for the five region levels.
    #[must_use]
    pub fn is_region(self) -> bool {
        Self::REGIONS.contains(&self)
    }

    /// The enclosing region level, if any.
    #[must_use]
    pub fn parent_region(self) -> Option<Self> {
        let pos = Self::REGIONS.iter().position(|k| *k == self)?;
        pos.checked_sub(1).map(|p| Self::REGIONS[p])
    }

    /// The next region level down, if any.
    #[must_use]
    pub fn child_region(self) -> Option<Self> {
        let pos = Self::REGIONS.iter().position(|k| *k == self)?;
        Self::REGIONS.get(pos + 1).copied()
    }

    /// `PK` prefix including the separator (`DEVICE#`).
    #[must_use]
    pub fn pk_prefix(self) -> String {
        format!("{}{}", self.tag(), KEY_SEPARATOR)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// PARTITION KEYS
// =============================================================================

/// `ENTITY#ID`.
#[must_use]
pub fn pk(kind: EntityKind, id: &str) -> String {
    format!("{}{}{}", kind.tag(), KEY_SEPARATOR, id)
}

/// Inverse of [`pk`]. The id is everything after the first separator.
#[must_use]
pub fn parse_pk(pk: &str) -> Option<(EntityKind, &str)> {
    let (tag, id) = pk.split_once(KEY_SEPARATOR)?;
    let kind = EntityKind::from_tag(tag)?;
    (!id.is_empty()).then_some((kind, id))
}

/// Metadata record of an aggregate: `ENTITY#ID` / `META`.
#[must_use]
pub fn meta_key(kind: EntityKind, id: &str) -> ItemKey {
    ItemKey::new(pk(kind, id), META_SK)
}

/// Customer record: `CUSTOMER#ID` / `ENTITY#CUSTOMER`.
#[must_use]
pub fn customer_key(id: &str) -> ItemKey {
    ItemKey::new(pk(EntityKind::Customer, id), CUSTOMER_SK)
}

/// Region record: `{type}#{code}` under both `PK` and `SK`.
#[must_use]
pub fn region_key(kind: EntityKind, code: &str) -> ItemKey {
    let key = pk(kind, code);
    ItemKey::new(key.clone(), key)
}

/// Region-combo lock: `REGION_LOCK#s#d#m#v#h` / `LOCK`.
#[must_use]
pub fn region_lock_key(tuple: &[&str; 5]) -> ItemKey {
    ItemKey::new(pk(EntityKind::RegionLock, &tuple.join("#")), LOCK_SK)
}

/// Sub-entity key under an aggregate partition.
#[must_use]
pub fn child_key(kind: EntityKind, id: &str, sub: &SubKey) -> ItemKey {
    ItemKey::new(pk(kind, id), sub.encode())
}

// =============================================================================
// SORT KEYS
// =============================================================================

/// Every sort-key shape used beneath an aggregate partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubKey {
    Meta,
    Lock,
    Config { version: String, created: String },
    Repair { repair_id: String, date: String },
    InstallAssoc { install_id: String },
    SimAssoc { sim_id: String },
    Runtime { event_date: String },
    DeviceAssoc { device_id: String },
    ContactAssoc { contact_id: String },
    DeviceHistory { timestamp: String, device_id: String },
    CustomerRecord,
    Contact { contact_id: String },
    Address { address_id: String },
    Image { image_id: String },
}

impl SubKey {
    /// Render as a sort key.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Meta => META_SK.to_string(),
            Self::Lock => LOCK_SK.to_string(),
            Self::Config { version, created } => {
                format!("{}{}#{}", prefix::CONFIG, version, created)
            }
            Self::Repair { repair_id, date } => format!("{}{}#{}", prefix::REPAIR, repair_id, date),
            Self::InstallAssoc { install_id } => format!("{}{}", prefix::INSTALL_ASSOC, install_id),
            Self::SimAssoc { sim_id } => format!("{}{}", prefix::SIM_ASSOC, sim_id),
            Self::Runtime { event_date } => format!("{}{}", prefix::RUNTIME, event_date),
            Self::DeviceAssoc { device_id } => format!("{}{}", prefix::DEVICE_ASSOC, device_id),
            Self::ContactAssoc { contact_id } => {
                format!("{}{}", prefix::CONTACT_ASSOC, contact_id)
            }
            Self::DeviceHistory {
                timestamp,
                device_id,
            } => format!("{}{}#{}", prefix::DEVICE_HISTORY, timestamp, device_id),
            Self::CustomerRecord => CUSTOMER_SK.to_string(),
            Self::Contact { contact_id } => format!("{}{}", prefix::CONTACT, contact_id),
            Self::Address { address_id } => format!("{}{}", prefix::ADDRESS, address_id),
            Self::Image { image_id } => format!("{}{}", prefix::IMAGE, image_id),
        }
    }

    /// Parse a sort key. Returns `None` for shapes that are not sub-entity
    /// keys (including region sort keys, which mirror their `PK`).
    #[must_use]
    pub fn parse(sk: &str) -> Option<Self> {
        if sk == META_SK {
            return Some(Self::Meta);
        }
        if sk == LOCK_SK {
            return Some(Self::Lock);
        }
        if sk == CUSTOMER_SK {
            return Some(Self::CustomerRecord);
        }
        if let Some(rest) = sk.strip_prefix(prefix::CONTACT) {
            return single(rest).map(|contact_id| Self::Contact { contact_id });
        }
        if let Some(rest) = sk.strip_prefix(prefix::ADDRESS) {
            return single(rest).map(|address_id| Self::Address { address_id });
        }

        let (tag, rest) = sk.split_once(KEY_SEPARATOR)?;
        match tag {
            "CONFIG" => pair(rest).map(|(version, created)| Self::Config { version, created }),
            "REPAIR" => pair(rest).map(|(repair_id, date)| Self::Repair { repair_id, date }),
            "INSTALL_ASSOC" => single(rest).map(|install_id| Self::InstallAssoc { install_id }),
            "SIM_ASSOC" => single(rest).map(|sim_id| Self::SimAssoc { sim_id }),
            "RUNTIME" => single(rest).map(|event_date| Self::Runtime { event_date }),
            "DEVICE_ASSOC" => single(rest).map(|device_id| Self::DeviceAssoc { device_id }),
            "CONTACT_ASSOC" => single(rest).map(|contact_id| Self::ContactAssoc { contact_id }),
            "DEVICE_HISTORY" => pair(rest).map(|(timestamp, device_id)| Self::DeviceHistory {
                timestamp,
                device_id,
            }),
            "IMAGE" => single(rest).map(|image_id| Self::Image { image_id }),
            _ => None,
        }
    }
}

fn single(rest: &str) -> Option<String> {
    (!rest.is_empty() && !rest.contains(KEY_SEPARATOR)).then(|| rest.to_string())
}

fn pair(rest: &str) -> Option<(String, String)> {
    let (a, b) = rest.split_once(KEY_SEPARATOR)?;
    Some((single(a)?, single(b)?))
}

/// Check one key part: non-empty, no `#`, no whitespace.
pub fn validate_part(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(format!("{} must not contain '#'", field));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(format!("{} must not contain whitespace", field));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
