//! Survey aggregate: `draft → submitted`, with images as sub-entities.
//!
//! Every mutation is conditional on `Status = draft`, so a submit racing
//! an update resolves to exactly one order.

use super::{Context, ListOptions, cascade_delete, list_aggregates, read_all, take_or_generate_id};
use crate::keys::{self, EntityKind, SubKey, prefix};
use crate::primitives::{META_SK, SURVEY_DRAFT, SURVEY_SUBMITTED};
use crate::store::{Patch, Precondition, StoreError, TransactOp};
use crate::validate::{Mode, schemas};
use crate::{Actor, FleetError, Item, ItemKey, ListPage};
use serde_json::{Value, json};

const STATUS: &str = "Status";

fn draft_only() -> Precondition {
    Precondition::All(vec![
        Precondition::MustExist,
        Precondition::attr_equals(STATUS, SURVEY_DRAFT),
    ])
}

/// Orchestrates survey operations.
#[derive(Debug, Clone)]
pub struct SurveyService {
    ctx: Context,
}

impl SurveyService {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn meta(id: &str) -> ItemKey {
        keys::meta_key(EntityKind::Survey, id)
    }

    fn image_key(id: &str, image_id: &str) -> ItemKey {
        keys::child_key(
            EntityKind::Survey,
            id,
            &SubKey::Image {
                image_id: image_id.to_string(),
            },
        )
    }

    /// Explain a failed draft-only write after re-reading META.
    fn refusal(&self, id: &str, verb: &str) -> FleetError {
        match self.ctx.store().get(&Self::meta(id)) {
            Ok(None) => FleetError::not_found("Survey", id),
            Ok(Some(_)) => FleetError::precondition(format!("Cannot {} submitted survey", verb)),
            Err(err) => err.into(),
        }
    }

    /// Create a draft survey.
    pub fn create(&self, body: &Value, actor: &Actor) -> Result<Item, FleetError> {
        let mut fields = schemas::SURVEY
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let id = take_or_generate_id(&mut fields, "SurveyId");
        let now = self.ctx.now();
        fields.insert(STATUS.into(), json!(SURVEY_DRAFT));
        fields.insert("CreatedBy".into(), json!(actor.performed_by));
        fields.insert("CreatedDate".into(), json!(now));
        fields.insert("UpdatedDate".into(), json!(now));
        self.ctx
            .create_meta(EntityKind::Survey, &Self::meta(&id), &id, fields)
    }

    /// Survey META with its images.
    pub fn get(&self, id: &str) -> Result<Value, FleetError> {
        crate::link::check_id("surveyId", id)?;
        let survey = self.ctx.require(&Self::meta(id), "Survey", id)?;
        let images = read_all(
            self.ctx.store(),
            &keys::pk(EntityKind::Survey, id),
            prefix::IMAGE,
        )?;
        let mut view = survey.view();
        if let Value::Object(map) = &mut view {
            map.insert(
                "Images".into(),
                Value::Array(images.iter().map(Item::view).collect()),
            );
        }
        Ok(view)
    }

    /// Patch a draft survey.
    pub fn update(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("surveyId", id)?;
        let fields = schemas::SURVEY
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        let patch = Patch::new()
            .set_all(fields)
            .set("UpdatedDate", self.ctx.now());
        match self.ctx.store().update(&Self::meta(id), &patch, draft_only()) {
            Ok(item) => Ok(item),
            Err(StoreError::PreconditionFailed { .. }) => Err(self.refusal(id, "update")),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a draft survey and its images.
    pub fn delete(&self, id: &str) -> Result<usize, FleetError> {
        crate::link::check_id("surveyId", id)?;
        match cascade_delete(self.ctx.store(), &Self::meta(id), draft_only()) {
            Ok(images) => Ok(images),
            Err(Some(err)) => Err(err),
            Err(None) => Err(self.refusal(id, "delete")),
        }
    }

    /// Move a complete draft to `submitted`.
    pub fn submit(&self, id: &str, actor: &Actor) -> Result<Item, FleetError> {
        crate::link::check_id("surveyId", id)?;
        let survey = self.ctx.require(&Self::meta(id), "Survey", id)?;
        if survey.get_str(STATUS) == Some(SURVEY_SUBMITTED) {
            return Err(FleetError::precondition(format!(
                "Survey {} is already submitted",
                id
            )));
        }
        let missing: Vec<String> = schemas::SURVEY_MANDATORY
            .iter()
            .filter(|field| survey.is_empty_attr(field))
            .map(|field| format!("{} is required for submission", field))
            .collect();
        if !missing.is_empty() {
            return Err(FleetError::Validation(missing));
        }

        let now = self.ctx.now();
        let patch = Patch::new()
            .set(STATUS, SURVEY_SUBMITTED)
            .set("SubmittedDate", now.clone())
            .set("SubmittedBy", actor.performed_by.clone())
            .set("UpdatedDate", now);
        match self.ctx.store().update(&Self::meta(id), &patch, draft_only()) {
            Ok(item) => {
                tracing::info!(survey_id = id, "survey submitted");
                Ok(item)
            }
            Err(StoreError::PreconditionFailed { .. }) => Err(self.refusal(id, "submit")),
            Err(err) => Err(err.into()),
        }
    }

    /// Page through surveys.
    pub fn list(&self, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        list_aggregates(self.ctx.store(), EntityKind::Survey, META_SK, opts)
    }

    /// Attach image metadata to a draft survey.
    pub fn add_image(&self, id: &str, body: &Value, actor: &Actor) -> Result<Item, FleetError> {
        crate::link::check_id("surveyId", id)?;
        let mut fields = schemas::SURVEY_IMAGE
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let image_id = take_or_generate_id(&mut fields, "ImageId");
        let mut image = Item::new(&Self::image_key(id, &image_id), "SURVEY_IMAGE");
        for (name, value) in fields {
            image.set(&name, value);
        }
        image.set("SurveyId", json!(id));
        image.set("UploadedBy", json!(actor.performed_by));
        image.set("UploadedDate", json!(self.ctx.now()));

        let ops = vec![
            TransactOp::put(image.clone(), Precondition::MustNotExist),
            TransactOp::check(Self::meta(id), draft_only()),
        ];
        match self.ctx.store().transact(ops) {
            Ok(()) => Ok(image),
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                if err.failed_ops().contains(&1) {
                    Err(self.refusal(id, "add images to"))
                } else {
                    Err(FleetError::already_exists("IMAGE", &image_id))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove an image from a draft survey.
    pub fn delete_image(&self, id: &str, image_id: &str) -> Result<(), FleetError> {
        crate::link::check_id("surveyId", id)?;
        crate::link::check_id("imageId", image_id)?;
        let ops = vec![
            TransactOp::delete(Self::image_key(id, image_id), Precondition::MustExist),
            TransactOp::check(Self::meta(id), draft_only()),
        ];
        match self.ctx.store().transact(ops) {
            Ok(()) => Ok(()),
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                if err.failed_ops().contains(&1) {
                    Err(self.refusal(id, "remove images from"))
                } else {
                    Err(FleetError::NotFound(format!(
                        "Image {} not found for survey {}",
                        image_id, id
                    )))
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::services::Services;
    use crate::store::MemoryStore;
    use crate::{Actor, FleetError, SystemClock};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn services() -> Services {
        let store = Arc::new(MemoryStore::new());
        Services::new(store.clone(), store, Arc::new(SystemClock::new()))
    }

    fn complete() -> Value {
        json!({
            "SurveyId": "SRV001",
            "CustomerId": "CUST1",
            "SurveyorName": "Ravi",
            "SurveyDate": "2024-06-01",
            "StateId": "TS",
            "DistrictId": "HYD",
            "MandalId": "MDPL",
            "VillageId": "VLG001",
            "HabitationId": "H01"
        })
    }

    #[test]
    fn incomplete_survey_lists_missing_fields() {
        let svc = services();
        svc.surveys
            .create(&json!({"SurveyId": "SRV001", "CustomerId": "CUST1"}), &Actor::system())
            .expect("create");
        let err = svc
            .surveys
            .submit("SRV001", &Actor::system())
            .expect_err("incomplete");
        assert!(matches!(&err, FleetError::Validation(m) if m.len() == 7));
        assert!(err.to_string().starts_with("SurveyorName is required for submission"));
    }

    #[test]
    fn images_follow_draft_state() {
        let svc = services();
        svc.surveys.create(&complete(), &Actor::system()).expect("create");
        svc.surveys
            .add_image("SRV001", &json!({"ImageId": "IMG1", "ImageKey": "surveys/SRV001/1.jpg"}), &Actor::system())
            .expect("image");
        let view = svc.surveys.get("SRV001").expect("get");
        assert_eq!(view["Images"].as_array().map(Vec::len), Some(1));

        svc.surveys.submit("SRV001", &Actor::system()).expect("submit");
        let err = svc
            .surveys
            .delete_image("SRV001", "IMG1")
            .expect_err("submitted");
        assert_eq!(err.to_string(), "Cannot remove images from submitted survey");
    }

    #[test]
    fn draft_delete_cascades_images() {
        let svc = services();
        svc.surveys.create(&complete(), &Actor::system()).expect("create");
        svc.surveys
            .add_image("SRV001", &json!({"ImageKey": "a.jpg"}), &Actor::system())
            .expect("image");
        assert_eq!(svc.surveys.delete("SRV001").expect("delete"), 1);
        assert!(matches!(svc.surveys.get("SRV001"), Err(FleetError::NotFound(_))));
        assert!(matches!(svc.surveys.delete("SRV001"), Err(FleetError::NotFound(_))));
    }
}
