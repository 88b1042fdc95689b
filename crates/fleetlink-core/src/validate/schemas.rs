//! Per-aggregate payload schemas.
//!
//! Device, install, survey and customer payloads use PascalCase attribute
//! names; SIM payloads use camelCase. Server-owned attributes (`PK`, `SK`,
//! `CreatedDate`, `LinkedSIM`, `Status` of surveys, ...) are never declared
//! here, so clients cannot write them.

use super::{FieldSpec, Rule, Schema};

const NAME: Rule = Rule::Length { min: 1, max: 100 };
const SHORT: Rule = Rule::Length { min: 1, max: 50 };
const DESCRIPTION: Rule = Rule::Length { min: 0, max: 1000 };
const REGION_ID: Rule = Rule::Length { min: 2, max: 10 };
const REGION_CODE: Rule = Rule::Length { min: 2, max: 20 };
const ID: Rule = Rule::Length { min: 1, max: 64 };

/// Allowed device statuses.
pub const DEVICE_STATUSES: &[&str] = &["active", "inactive", "maintenance", "retired"];

/// Allowed SIM statuses.
pub const SIM_STATUSES: &[&str] = &["inactive", "active", "suspended"];

/// Allowed install statuses.
pub const INSTALL_STATUSES: &[&str] = &["active", "inactive"];

/// Allowed primary-device kinds of an install.
pub const PRIMARY_DEVICES: &[&str] = &["water", "chlorine", "none"];

/// Allowed repair statuses.
pub const REPAIR_STATUSES: &[&str] = &["pending", "in_progress", "completed"];

// =============================================================================
// DEVICE
// =============================================================================

pub const DEVICE: Schema = Schema {
    fields: &[
        FieldSpec::fixed("DeviceId", &[Rule::KeyPart, ID]),
        FieldSpec::new("DeviceName", &[Rule::Required, NAME]),
        FieldSpec::new("DeviceType", &[Rule::Required, SHORT]),
        FieldSpec::new("SerialNumber", &[NAME]),
        FieldSpec::new("Model", &[NAME]),
        FieldSpec::new("Manufacturer", &[NAME]),
        FieldSpec::new("Status", &[Rule::OneOf(DEVICE_STATUSES)]),
        FieldSpec::new("Location", &[Rule::Length { min: 0, max: 200 }]),
        FieldSpec::new("PurchaseDate", &[Rule::IsoDate]),
        FieldSpec::new("Description", &[DESCRIPTION]),
    ],
};

pub const CONFIG: Schema = Schema {
    fields: &[
        FieldSpec::new("ConfigVersion", &[Rule::Required, Rule::KeyPart, SHORT]),
        FieldSpec::new("Settings", &[Rule::Required, Rule::Object]),
        FieldSpec::new("AppliedBy", &[NAME]),
        FieldSpec::new("Description", &[DESCRIPTION]),
    ],
};

pub const REPAIR: Schema = Schema {
    fields: &[
        FieldSpec::fixed("RepairId", &[Rule::KeyPart, ID]),
        FieldSpec::fixed("RepairDate", &[Rule::Required, Rule::IsoDate, Rule::KeyPart]),
        FieldSpec::new("Description", &[Rule::Required, Rule::Length { min: 1, max: 1000 }]),
        FieldSpec::new("Technician", &[NAME]),
        FieldSpec::new("Cost", &[Rule::PositiveNumber]),
        FieldSpec::new("PartsReplaced", &[Rule::Length { min: 0, max: 500 }]),
        FieldSpec::new("Status", &[Rule::OneOf(REPAIR_STATUSES)]),
    ],
};

pub const RUNTIME: Schema = Schema {
    fields: &[
        FieldSpec::new("EventDate", &[Rule::Required, Rule::IsoDateTime, Rule::KeyPart]),
        FieldSpec::new("EventType", &[Rule::Required, SHORT]),
        FieldSpec::new("RuntimeHours", &[Rule::NonNegativeNumber]),
        FieldSpec::new("Details", &[Rule::Object]),
    ],
};

// =============================================================================
// SIM
// =============================================================================

pub const SIM: Schema = Schema {
    fields: &[
        FieldSpec::fixed("simId", &[Rule::KeyPart, ID]),
        FieldSpec::new("iccid", &[Rule::Required, Rule::Length { min: 18, max: 22 }]),
        FieldSpec::new("msisdn", &[Rule::Phone]),
        FieldSpec::new("provider", &[Rule::Required, SHORT]),
        FieldSpec::new("plan", &[NAME]),
        FieldSpec::new("status", &[Rule::OneOf(SIM_STATUSES)]),
        FieldSpec::new("dataLimitMb", &[Rule::PositiveNumber]),
        FieldSpec::new("activationDate", &[Rule::IsoDate]),
        FieldSpec::new("notes", &[DESCRIPTION]),
    ],
};

pub const LINK_SIM: Schema = Schema {
    fields: &[FieldSpec::new("simId", &[Rule::Required, Rule::KeyPart, ID])],
};

// =============================================================================
// INSTALL
// =============================================================================

pub const INSTALL: Schema = Schema {
    fields: &[
        FieldSpec::fixed("InstallId", &[Rule::KeyPart, ID]),
        FieldSpec::new("InstallName", &[Rule::Required, NAME]),
        FieldSpec::fixed("CustomerId", &[Rule::Required, Rule::KeyPart, ID]),
        FieldSpec::fixed("StateId", &[Rule::Required, Rule::KeyPart, REGION_ID]),
        FieldSpec::fixed("DistrictId", &[Rule::Required, Rule::KeyPart, REGION_CODE]),
        FieldSpec::fixed("MandalId", &[Rule::Required, Rule::KeyPart, REGION_CODE]),
        FieldSpec::fixed("VillageId", &[Rule::Required, Rule::KeyPart, REGION_CODE]),
        FieldSpec::fixed("HabitationId", &[Rule::Required, Rule::KeyPart, REGION_CODE]),
        FieldSpec::new("PrimaryDevice", &[Rule::OneOf(PRIMARY_DEVICES)]),
        FieldSpec::new("Status", &[Rule::OneOf(INSTALL_STATUSES)]),
        FieldSpec::new("InstallationDate", &[Rule::IsoDate]),
        FieldSpec::new("Notes", &[DESCRIPTION]),
    ],
};

// =============================================================================
// SURVEY
// =============================================================================

pub const SURVEY: Schema = Schema {
    fields: &[
        FieldSpec::fixed("SurveyId", &[Rule::KeyPart, ID]),
        FieldSpec::new("CustomerId", &[Rule::KeyPart, ID]),
        FieldSpec::new("SurveyorName", &[NAME]),
        FieldSpec::new("SurveyDate", &[Rule::IsoDate]),
        FieldSpec::new("StateId", &[Rule::KeyPart, REGION_ID]),
        FieldSpec::new("DistrictId", &[Rule::KeyPart, REGION_CODE]),
        FieldSpec::new("MandalId", &[Rule::KeyPart, REGION_CODE]),
        FieldSpec::new("VillageId", &[Rule::KeyPart, REGION_CODE]),
        FieldSpec::new("HabitationId", &[Rule::KeyPart, REGION_CODE]),
        FieldSpec::new("WaterSource", &[NAME]),
        FieldSpec::new("Households", &[Rule::NonNegativeNumber]),
        FieldSpec::new("Findings", &[Rule::Object]),
        FieldSpec::new("Notes", &[DESCRIPTION]),
    ],
};

/// Fields a survey must carry before it can be submitted.
pub const SURVEY_MANDATORY: &[&str] = &[
    "CustomerId",
    "SurveyorName",
    "SurveyDate",
    "StateId",
    "DistrictId",
    "MandalId",
    "VillageId",
    "HabitationId",
];

pub const SURVEY_IMAGE: Schema = Schema {
    fields: &[
        FieldSpec::fixed("ImageId", &[Rule::KeyPart, ID]),
        FieldSpec::new("ImageKey", &[Rule::Required, Rule::Length { min: 1, max: 500 }]),
        FieldSpec::new("ContentType", &[Rule::OneOf(&["image/jpeg", "image/png", "image/webp"])]),
        FieldSpec::new("Caption", &[Rule::Length { min: 0, max: 200 }]),
    ],
};

// =============================================================================
// CUSTOMER
// =============================================================================

pub const CUSTOMER: Schema = Schema {
    fields: &[
        FieldSpec::fixed("CustomerId", &[Rule::KeyPart, ID]),
        FieldSpec::new("CustomerName", &[Rule::Required, NAME]),
        FieldSpec::new("CustomerType", &[Rule::OneOf(&["individual", "business", "government"])]),
        FieldSpec::new("Email", &[Rule::Email]),
        FieldSpec::new("Phone", &[Rule::Phone]),
        FieldSpec::new("Status", &[Rule::OneOf(INSTALL_STATUSES)]),
        FieldSpec::new("Notes", &[DESCRIPTION]),
    ],
};

pub const CONTACT: Schema = Schema {
    fields: &[
        FieldSpec::fixed("ContactId", &[Rule::KeyPart, ID]),
        FieldSpec::new("ContactName", &[Rule::Required, NAME]),
        FieldSpec::new("Email", &[Rule::Email]),
        FieldSpec::new("Phone", &[Rule::Phone]),
        FieldSpec::new("Role", &[SHORT]),
        FieldSpec::new("IsPrimary", &[Rule::Boolean]),
    ],
};

pub const ADDRESS: Schema = Schema {
    fields: &[
        FieldSpec::fixed("AddressId", &[Rule::KeyPart, ID]),
        FieldSpec::new("AddressType", &[Rule::OneOf(&["billing", "shipping", "site"])]),
        FieldSpec::new("Line1", &[Rule::Required, Rule::Length { min: 1, max: 200 }]),
        FieldSpec::new("Line2", &[Rule::Length { min: 0, max: 200 }]),
        FieldSpec::new("City", &[Rule::Required, NAME]),
        FieldSpec::new("State", &[NAME]),
        FieldSpec::new("PostalCode", &[Rule::Length { min: 4, max: 10 }]),
        FieldSpec::new("Country", &[SHORT]),
    ],
};

// =============================================================================
// REGION
// =============================================================================

pub const REGION: Schema = Schema {
    fields: &[
        FieldSpec::fixed("Code", &[Rule::Required, Rule::KeyPart, REGION_CODE]),
        FieldSpec::new("Name", &[Rule::Required, NAME]),
        FieldSpec::fixed("ParentCode", &[Rule::KeyPart, REGION_CODE]),
    ],
};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Mode;
    use serde_json::json;

    #[test]
    fn install_region_ids_are_required_and_fixed() {
        let errors = INSTALL
            .validate(&json!({"InstallName": "Tank 1"}), Mode::Create)
            .expect_err("invalid");
        assert_eq!(
            errors,
            vec![
                "CustomerId is required",
                "StateId is required",
                "DistrictId is required",
                "MandalId is required",
                "VillageId is required",
                "HabitationId is required",
            ]
        );

        let errors = INSTALL
            .validate(&json!({"StateId": "AP"}), Mode::Update)
            .expect_err("invalid");
        assert_eq!(errors, vec!["StateId cannot be changed"]);
    }

    #[test]
    fn state_id_length() {
        let errors = INSTALL
            .validate(
                &json!({
                    "InstallName": "x", "CustomerId": "C1", "StateId": "T",
                    "DistrictId": "HYD", "MandalId": "MD", "VillageId": "VL", "HabitationId": "H1"
                }),
                Mode::Create,
            )
            .expect_err("invalid");
        assert_eq!(errors, vec!["StateId must be between 2 and 10 characters"]);
    }

    #[test]
    fn server_owned_attributes_are_unknown() {
        let errors = DEVICE
            .validate(
                &json!({"DeviceName": "a", "DeviceType": "pump", "LinkedSIM": {}}),
                Mode::Create,
            )
            .expect_err("invalid");
        assert_eq!(errors, vec!["Unknown field: LinkedSIM"]);
    }

    #[test]
    fn sim_status_enum() {
        let errors = SIM
            .validate(&json!({"status": "lost"}), Mode::Update)
            .expect_err("invalid");
        assert_eq!(errors, vec!["status must be one of: inactive, active, suspended"]);
    }

    #[test]
    fn key_parts_reject_separator() {
        let errors = DEVICE
            .validate(
                &json!({"DeviceId": "DEV#1", "DeviceName": "a", "DeviceType": "pump"}),
                Mode::Create,
            )
            .expect_err("invalid");
        assert_eq!(errors, vec!["DeviceId must not contain '#'"]);
    }
}
