use fieldnote_core::db::open_db_in_memory;
use fieldnote_core::{
    Field, FieldKind, NewObservation, Observation, ObservationService, ObservationType,
    Predicate, Rule, SchemaRegistry, SqliteObservationRepository, SqliteViewRepository, View,
    ViewService, ViewServiceError,
};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

struct Fixture {
    conn: Connection,
    project: Uuid,
    registry: SchemaRegistry,
    sightings: ObservationType,
    hazards: ObservationType,
    oak: Observation,
    ash: Observation,
    pine: Observation,
    flood: Observation,
}

fn attributes(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn filters(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn create(
    service: &mut ObservationService<SqliteObservationRepository<'_>>,
    schema: &ObservationType,
    attrs: Map<String, Value>,
) -> Observation {
    service
        .create(
            NewObservation {
                location: Uuid::new_v4(),
                creator: Uuid::new_v4(),
                attributes: attrs,
                requires_moderation: false,
            },
            schema,
        )
        .unwrap()
}

fn fixture() -> Fixture {
    let conn = open_db_in_memory().unwrap();
    let project = Uuid::new_v4();

    let sightings = ObservationType::new(
        Uuid::new_v4(),
        project,
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
            Field::new(
                "species",
                FieldKind::Selection {
                    choices: vec!["oak".to_string(), "ash".to_string(), "pine".to_string()],
                },
            )
            .unwrap(),
            Field::new("seen_at", FieldKind::Date).unwrap(),
        ],
    )
    .unwrap();
    let hazards = ObservationType::new(
        Uuid::new_v4(),
        project,
        "hazards",
        vec![Field::new("text", FieldKind::Text).unwrap().required()],
    )
    .unwrap();

    let mut registry = SchemaRegistry::new();
    registry.register(sightings.clone()).unwrap();
    registry.register(hazards.clone()).unwrap();

    let mut service = ObservationService::new(SqliteObservationRepository::new(&conn));

    let oak = create(
        &mut service,
        &sightings,
        attributes(&[
            ("text", json!("Old oak")),
            ("number", json!(12)),
            ("species", json!("oak")),
            ("seen_at", json!("2024-05-01")),
        ]),
    );
    let ash = create(
        &mut service,
        &sightings,
        attributes(&[
            ("text", json!("Ash grove")),
            ("number", json!(3)),
            ("species", json!("ash")),
            ("seen_at", json!("2024-07-15")),
        ]),
    );
    let pine = create(
        &mut service,
        &sightings,
        attributes(&[
            ("text", json!("Tall pine")),
            ("number", json!(20)),
            ("species", json!("pine")),
            ("seen_at", json!("2023-12-01")),
        ]),
    );
    let flood = create(
        &mut service,
        &hazards,
        attributes(&[("text", json!("Flooded path"))]),
    );

    Fixture {
        conn,
        project,
        registry,
        sightings,
        hazards,
        oak,
        ash,
        pine,
        flood,
    }
}

fn ids(observations: &[Observation]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = observations.iter().map(Observation::id).collect();
    ids.sort();
    ids
}

fn expected_ids(observations: &[&Observation]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = observations.iter().map(|obs| obs.id()).collect();
    ids.sort();
    ids
}

fn saved_view(fixture: &Fixture, rules: Vec<Rule>) -> Uuid {
    let mut view = View::new(fixture.project, "curated", Uuid::new_v4(), false, 0);
    for rule in rules {
        view.add_rule(rule);
    }
    let mut service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    service.create_view(&view).unwrap()
}

fn view_data(fixture: &Fixture, view: Uuid) -> Vec<Observation> {
    let service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    let observations = SqliteObservationRepository::new(&fixture.conn);
    service
        .data(view, &fixture.registry, &observations)
        .unwrap()
}

#[test]
fn view_without_rules_exposes_nothing() {
    let fixture = fixture();
    let view = saved_view(&fixture, Vec::new());

    let service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    assert_eq!(
        service.resolve(view, &fixture.registry).unwrap(),
        Predicate::Nothing
    );
    assert!(view_data(&fixture, view).is_empty());
}

#[test]
fn rule_without_filters_selects_the_whole_type() {
    let fixture = fixture();
    let view = saved_view(&fixture, vec![Rule::new(fixture.sightings.id(), None)]);

    let data = view_data(&fixture, view);
    assert_eq!(
        ids(&data),
        expected_ids(&[&fixture.oak, &fixture.ash, &fixture.pine])
    );
}

#[test]
fn text_filter_matches_exactly() {
    let fixture = fixture();
    let view = saved_view(
        &fixture,
        vec![Rule::new(
            fixture.sightings.id(),
            Some(filters(&[("text", "Old oak")])),
        )],
    );

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak]));
}

#[test]
fn numeric_range_filter_compares_numerically() {
    let fixture = fixture();
    // "3" > "10" textually; numeric comparison must exclude it anyway.
    let view = saved_view(
        &fixture,
        vec![Rule::new(
            fixture.sightings.id(),
            Some(filters(&[("number", r#"{"min": 10}"#)])),
        )],
    );

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak, &fixture.pine]));
}

#[test]
fn selection_list_filter_matches_value_sets() {
    let fixture = fixture();
    let view = saved_view(
        &fixture,
        vec![Rule::new(
            fixture.sightings.id(),
            Some(filters(&[("species", r#"["oak", "ash"]"#)])),
        )],
    );

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak, &fixture.ash]));
}

#[test]
fn date_range_filter_uses_chronological_order() {
    let fixture = fixture();
    let view = saved_view(
        &fixture,
        vec![Rule::new(
            fixture.sightings.id(),
            Some(filters(&[("seen_at", r#"{"min": "2024-01-01"}"#)])),
        )],
    );

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak, &fixture.ash]));
}

#[test]
fn combined_filters_are_a_conjunction() {
    let fixture = fixture();
    let view = saved_view(
        &fixture,
        vec![Rule::new(
            fixture.sightings.id(),
            Some(filters(&[
                ("number", r#"{"min": 10}"#),
                ("species", "oak"),
            ])),
        )],
    );

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak]));
}

#[test]
fn multiple_rules_union_across_types() {
    let fixture = fixture();
    let view = saved_view(
        &fixture,
        vec![
            Rule::new(
                fixture.sightings.id(),
                Some(filters(&[("species", "oak")])),
            ),
            Rule::new(fixture.hazards.id(), None),
        ],
    );

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak, &fixture.flood]));
}

#[test]
fn soft_deleted_rule_stops_contributing() {
    let fixture = fixture();
    let oak_rule = Rule::new(
        fixture.sightings.id(),
        Some(filters(&[("species", "oak")])),
    );
    let hazard_rule = Rule::new(fixture.hazards.id(), None);
    let hazard_rule_id = hazard_rule.id();
    let view = saved_view(&fixture, vec![oak_rule, hazard_rule]);

    let mut service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    service.delete_rule(hazard_rule_id).unwrap();

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak]));
}

#[test]
fn soft_deleted_view_is_not_resolvable() {
    let fixture = fixture();
    let view = saved_view(&fixture, vec![Rule::new(fixture.sightings.id(), None)]);

    let mut service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    service.delete_view(view).unwrap();

    let err = service.resolve(view, &fixture.registry).unwrap_err();
    assert!(matches!(err, ViewServiceError::NotFound(id) if id == view));
    assert!(service.list_views(fixture.project).unwrap().is_empty());
}

#[test]
fn soft_deleted_observations_leave_view_data() {
    let fixture = fixture();
    let view = saved_view(&fixture, vec![Rule::new(fixture.sightings.id(), None)]);

    let mut service = ObservationService::new(SqliteObservationRepository::new(&fixture.conn));
    service.delete(fixture.ash.id()).unwrap();

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak, &fixture.pine]));
}

#[test]
fn sql_execution_agrees_with_in_memory_evaluation() {
    let fixture = fixture();
    let rule = Rule::new(
        fixture.sightings.id(),
        Some(filters(&[
            ("number", r#"{"min": 5, "max": 15}"#),
            ("seen_at", r#"{"min": "2024-01-01"}"#),
        ])),
    );
    let view = saved_view(&fixture, vec![rule.clone()]);
    let predicate = rule.compile(&fixture.registry);

    let data = view_data(&fixture, view);
    let all = [&fixture.oak, &fixture.ash, &fixture.pine, &fixture.flood];
    let in_memory: Vec<Uuid> = {
        let mut matched: Vec<Uuid> = all
            .iter()
            .filter(|obs| predicate.matches(obs))
            .map(|obs| obs.id())
            .collect();
        matched.sort();
        matched
    };
    assert_eq!(ids(&data), in_memory);
    assert_eq!(ids(&data), expected_ids(&[&fixture.oak]));
}

#[test]
fn rules_survive_storage_round_trips_byte_for_byte() {
    let fixture = fixture();
    let stored_spec = r#"{"min": 5 }"#;
    let rule = Rule::new(
        fixture.sightings.id(),
        Some(filters(&[("number", stored_spec)])),
    );
    let view = saved_view(&fixture, vec![rule]);

    let service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    let loaded = service.get_view(view).unwrap().unwrap();
    assert_eq!(loaded.rules().len(), 1);
    assert_eq!(
        loaded.rules()[0]
            .filters()
            .and_then(|filters| filters.get("number"))
            .map(String::as_str),
        Some(stored_spec)
    );
}

#[test]
fn rules_added_after_creation_contribute_on_next_resolve() {
    let fixture = fixture();
    let view = saved_view(&fixture, Vec::new());
    assert!(view_data(&fixture, view).is_empty());

    let mut service = ViewService::new(SqliteViewRepository::new(&fixture.conn));
    service
        .add_rule(view, &Rule::new(fixture.hazards.id(), None))
        .unwrap();

    let data = view_data(&fixture, view);
    assert_eq!(ids(&data), expected_ids(&[&fixture.flood]));
}
