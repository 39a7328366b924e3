use fieldnote_core::db::open_db_in_memory;
use fieldnote_core::{
    Field, FieldKind, NewObservation, Observation, ObservationRepository, ObservationService,
    ObservationServiceError, ObservationStatus, ObservationType, Predicate, RepoError,
    SqliteObservationRepository, UpdateFormatError, UpdateOutcome,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn schema() -> ObservationType {
    ObservationType::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "sightings",
        vec![
            Field::new("text", FieldKind::Text).unwrap().required(),
            Field::new(
                "number",
                FieldKind::Numeric {
                    min: None,
                    max: None,
                },
            )
            .unwrap(),
        ],
    )
    .unwrap()
}

fn attributes(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn new_observation(attrs: Map<String, Value>) -> NewObservation {
    NewObservation {
        location: Uuid::new_v4(),
        creator: Uuid::new_v4(),
        attributes: attrs,
        requires_moderation: false,
    }
}

#[test]
fn create_persists_version_one_with_single_revision() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
            &schema,
        )
        .unwrap();

    let loaded = service.get(created.id()).unwrap().unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.status(), ObservationStatus::Active);
    assert_eq!(loaded.attributes().get("text"), Some(&json!("Text")));
    assert_eq!(loaded.attributes().get("number"), Some(&json!("12")));
    assert_eq!(loaded.revisions().len(), 1);
    assert_eq!(loaded.revisions()[0].version, 1);
    assert_eq!(&loaded.revisions()[0].attributes, loaded.attributes());
    assert_eq!(loaded.revisions()[0].updating_user, loaded.creator());
}

#[test]
fn clean_then_stale_update_follows_the_conflict_protocol() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
            &schema,
        )
        .unwrap();

    let updater = Uuid::new_v4();
    let (updated, outcome) = service
        .update(
            created.id(),
            &attributes(&[
                ("text", json!("Updated")),
                ("number", json!(13)),
                ("version", json!(1)),
            ]),
            updater,
            &schema,
        )
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied);
    assert_eq!(updated.version(), 2);
    assert_eq!(updated.status(), ObservationStatus::Active);
    assert_eq!(updated.attributes().get("text"), Some(&json!("Updated")));
    assert_eq!(updated.attributes().get("number"), Some(&json!("13")));

    // A second user still holding version 1 submits a stale update.
    let second_updater = Uuid::new_v4();
    let (conflicted, outcome) = service
        .update(
            created.id(),
            &attributes(&[("number", json!(5)), ("version", json!(1))]),
            second_updater,
            &schema,
        )
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::FlaggedForReview);
    assert_eq!(conflicted.version(), 3);
    assert_eq!(conflicted.status(), ObservationStatus::Review);
    assert_eq!(conflicted.attributes().get("number"), Some(&json!("5")));
    assert_eq!(conflicted.attributes().get("text"), Some(&json!("Updated")));

    let loaded = service.get(created.id()).unwrap().unwrap();
    assert_eq!(loaded.status(), ObservationStatus::Review);
    assert_eq!(loaded.revisions().len(), 3);
    assert_eq!(
        loaded
            .revisions()
            .iter()
            .map(|revision| revision.version)
            .collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(loaded.is_contributor(updater));
    assert!(loaded.is_contributor(second_updater));
}

#[test]
fn update_without_version_marker_is_rejected_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
            &schema,
        )
        .unwrap();

    let err = service
        .update(
            created.id(),
            &attributes(&[("text", json!("Updated"))]),
            Uuid::new_v4(),
            &schema,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ObservationServiceError::Format(UpdateFormatError::MissingVersion)
    ));

    let loaded = service.get(created.id()).unwrap().unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.attributes().get("text"), Some(&json!("Text")));
    assert_eq!(loaded.revisions().len(), 1);
}

#[test]
fn invalid_update_is_rejected_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
            &schema,
        )
        .unwrap();

    let err = service
        .update(
            created.id(),
            &attributes(&[("number", json!("abc")), ("version", json!(1))]),
            Uuid::new_v4(),
            &schema,
        )
        .unwrap_err();
    let ObservationServiceError::Validation(validation) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(validation.violations.len(), 1);
    assert_eq!(validation.violations[0].key, "number");

    let loaded = service.get(created.id()).unwrap().unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.attributes().get("number"), Some(&json!("12")));
}

#[test]
fn invalid_create_persists_nothing() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let err = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!("abc"))])),
            &schema,
        )
        .unwrap_err();
    assert!(matches!(err, ObservationServiceError::Validation(_)));

    let all = service
        .query(schema.project(), &Predicate::TypeIs(schema.id()))
        .unwrap();
    assert!(all.is_empty());
}

#[test]
fn partial_update_preserves_untouched_keys() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
            &schema,
        )
        .unwrap();

    let (updated, _) = service
        .update(
            created.id(),
            &attributes(&[("number", json!(99)), ("version", json!(1))]),
            Uuid::new_v4(),
            &schema,
        )
        .unwrap();
    assert_eq!(updated.attributes().get("text"), Some(&json!("Text")));
    assert_eq!(updated.attributes().get("number"), Some(&json!("99")));
}

#[test]
fn delete_hides_the_observation_but_keeps_history() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
            &schema,
        )
        .unwrap();
    service
        .update(
            created.id(),
            &attributes(&[("number", json!(13)), ("version", json!(1))]),
            Uuid::new_v4(),
            &schema,
        )
        .unwrap();

    service.delete(created.id()).unwrap();
    assert!(service.get(created.id()).unwrap().is_none());

    // History stays on disk behind the visibility guard.
    let repo = SqliteObservationRepository::new(&conn);
    let retained = repo.get_observation(created.id(), true).unwrap().unwrap();
    assert_eq!(retained.status(), ObservationStatus::Deleted);
    assert_eq!(retained.version(), 2);
    assert_eq!(retained.revisions().len(), 2);

    // Deleted records are not updatable.
    let err = service
        .update(
            created.id(),
            &attributes(&[("number", json!(1)), ("version", json!(2))]),
            Uuid::new_v4(),
            &schema,
        )
        .unwrap_err();
    assert!(matches!(err, ObservationServiceError::NotFound(_)));
}

#[test]
fn lost_storage_race_surfaces_as_concurrent_update() {
    let conn = open_db_in_memory().unwrap();
    let schema = schema();
    let mut repo = SqliteObservationRepository::new(&conn);

    let observation = Observation::create(
        new_observation(attributes(&[("text", json!("Text")), ("number", json!(12))])),
        &schema,
        1_700_000_000_000,
    )
    .unwrap();
    repo.create_observation(&observation).unwrap();

    // Two writers load the same snapshot.
    let mut first = repo.get_observation(observation.id(), false).unwrap().unwrap();
    let mut second = first.clone();

    first
        .apply_update(
            &attributes(&[("number", json!(1)), ("version", json!(1))]),
            Uuid::new_v4(),
            &schema,
            1_700_000_000_001,
        )
        .unwrap();
    repo.store_update(&first, 1).unwrap();

    second
        .apply_update(
            &attributes(&[("number", json!(2)), ("version", json!(1))]),
            Uuid::new_v4(),
            &schema,
            1_700_000_000_002,
        )
        .unwrap();
    let err = repo.store_update(&second, 1).unwrap_err();
    assert!(matches!(err, RepoError::ConcurrentUpdate { expected: 1, .. }));

    // The first writer's state is what persisted.
    let loaded = repo.get_observation(observation.id(), false).unwrap().unwrap();
    assert_eq!(loaded.version(), 2);
    assert_eq!(loaded.attributes().get("number"), Some(&json!("1")));
    assert_eq!(loaded.revisions().len(), 2);
}

#[test]
fn unknown_attribute_keys_round_trip_through_storage() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            new_observation(attributes(&[
                ("text", json!("Text")),
                ("legacy_tag", json!("imported")),
            ])),
            &schema,
        )
        .unwrap();

    let loaded = service.get(created.id()).unwrap().unwrap();
    assert_eq!(loaded.attributes().get("legacy_tag"), Some(&json!("imported")));
}

#[test]
fn moderated_create_round_trips_pending_status() {
    let conn = open_db_in_memory().unwrap();
    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));
    let schema = schema();

    let created = service
        .create(
            NewObservation {
                location: Uuid::new_v4(),
                creator: Uuid::new_v4(),
                attributes: attributes(&[("text", json!("Text"))]),
                requires_moderation: true,
            },
            &schema,
        )
        .unwrap();

    let loaded = service.get(created.id()).unwrap().unwrap();
    assert_eq!(loaded.status(), ObservationStatus::Pending);
}
