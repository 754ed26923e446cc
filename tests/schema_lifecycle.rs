//! End-to-end tests for the schema lifecycle
//!
//! Registry loading, validation of real plans, and migrations through the
//! manager facade.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use mediaplan_schema::{
    Conversion, Document, FieldRule, MigrationError, MigrationStep, SchemaConfig, SchemaDefinition,
    SchemaError, SchemaManager, SchemaMigrator, SchemaRegistry, SchemaValidator, SchemaVersion,
    ValidationErrorKind,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn fixture(json: &str) -> Document {
    Document::from_value(serde_json::from_str(json).unwrap()).unwrap()
}

fn plan_v0() -> Document {
    fixture(include_str!("fixtures/plan_v0.json"))
}

fn plan_v1() -> Document {
    fixture(include_str!("fixtures/plan_v1.json"))
}

fn version(raw: &str) -> SchemaVersion {
    SchemaVersion::parse(raw).unwrap()
}

fn definition(raw: &str, schema: Value) -> SchemaDefinition {
    SchemaDefinition::from_value(version(raw), schema).unwrap()
}

fn manager_with_steps(definitions: Vec<SchemaDefinition>, steps: Vec<MigrationStep>) -> SchemaManager {
    let registry = Arc::new(SchemaRegistry::from_definitions(definitions).unwrap());
    let mut migrator = SchemaMigrator::new(SchemaValidator::new(registry));
    for step in steps {
        migrator.register_step(step).unwrap();
    }
    SchemaManager::with_migrator(migrator)
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_every_registered_version_has_a_definition() {
    let manager = SchemaManager::new();
    let supported = manager.get_supported_versions().unwrap();

    let mut sorted = supported.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(supported, sorted, "versions must be ascending and unique");

    let registry = manager.registry().unwrap();
    for v in &supported {
        let definition = registry.get_definition(v).unwrap();
        assert_eq!(definition.version(), v);
        assert_eq!(definition.checksum().as_str().len(), 64);
    }
    assert_eq!(&manager.get_current_version().unwrap(), supported.last().unwrap());
}

#[test]
fn test_directory_registry_from_config() {
    let dir = TempDir::new().unwrap();
    for (tag, budget_type) in [("v1.0.0", "string"), ("v1.1.0", "number")] {
        let version_dir = dir.path().join(tag);
        fs::create_dir_all(&version_dir).unwrap();
        let schema = json!({
            "type": "object",
            "required": ["meta", "budget"],
            "properties": {
                "meta": { "$ref": "meta.schema.json" },
                "budget": { "type": budget_type }
            }
        });
        fs::write(version_dir.join("mediaplan.schema.json"), schema.to_string()).unwrap();
        fs::write(
            version_dir.join("meta.schema.json"),
            json!({ "type": "object", "required": ["schema_version"] }).to_string(),
        )
        .unwrap();
    }

    let mut config = SchemaConfig::default();
    config.registry.definitions_dir = Some(dir.path().to_path_buf());
    let manager = SchemaManager::from_config(&config);

    assert_eq!(manager.get_current_version().unwrap(), version("v1.1.0"));
    let doc = Document::from_value(json!({ "meta": { "schema_version": "v1.1.0" }, "budget": "12" })).unwrap();
    let result = manager.validate(&doc, None).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.errors()[0].kind, ValidationErrorKind::TypeMismatch);

    // No step between the two versions
    let err = manager.migrate(&doc, &version("v1.0.0"), None).unwrap_err();
    assert!(matches!(err, SchemaError::Migration(MigrationError::MissingStep { .. })));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_valid_plans_have_no_errors() {
    let manager = SchemaManager::new();
    let v0 = manager.validate(&plan_v0(), None).unwrap();
    assert!(v0.is_valid(), "{}", v0.summary());
    let v1 = manager.validate(&plan_v1(), None).unwrap();
    assert!(v1.is_valid(), "{}", v1.summary());
}

#[test]
fn test_each_missing_required_field_is_reported() {
    let manager = SchemaManager::new();

    let mut one = plan_v1();
    one.remove("campaign");
    let result = manager.validate(&one, None).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.errors()[0].kind, ValidationErrorKind::MissingField);
    assert_eq!(result.errors()[0].path, "campaign");

    let mut two = plan_v1();
    two.remove("campaign");
    two.remove("lineitems");
    let result = manager.validate(&two, None).unwrap();
    let missing: Vec<_> = result
        .of_kind(ValidationErrorKind::MissingField)
        .map(|e| e.path.as_str())
        .collect();
    assert_eq!(missing, vec!["campaign", "lineitems"]);
    assert_eq!(result.len(), 2);
}

#[test]
fn test_all_problems_reported_in_one_pass() {
    let mut doc = plan_v1().to_value();
    doc["campaign"]["audience_gender"] = json!("Everyone");
    doc["campaign"]["budget_total"] = json!("lots");
    doc["lineitems"][0]["cost_total"] = json!(-1);
    doc["lineitems"][1]["end_date"] = json!("2025-09-30");
    doc["lineitems"][1]
        .as_object_mut()
        .unwrap()
        .remove("name");

    let result = SchemaManager::new()
        .validate(&Document::from_value(doc).unwrap(), None)
        .unwrap();

    let found: Vec<_> = result.iter().map(|e| (e.path.as_str(), e.kind)).collect();
    assert_eq!(
        found,
        vec![
            ("campaign.budget_total", ValidationErrorKind::TypeMismatch),
            ("campaign.audience_gender", ValidationErrorKind::InvalidEnumValue),
            ("lineitems[0].cost_total", ValidationErrorKind::OutOfRange),
            ("lineitems[1].name", ValidationErrorKind::MissingField),
            ("lineitems[1].end_date", ValidationErrorKind::ConstraintViolation),
        ]
    );
}

#[test]
fn test_constraints_follow_configuration() {
    let mut doc = plan_v1().to_value();
    doc["campaign"]["end_date"] = json!("2025-05-01");
    let doc = Document::from_value(doc).unwrap();

    let strict = SchemaManager::new().validate(&doc, None).unwrap();
    assert!(strict.of_kind(ValidationErrorKind::ConstraintViolation).count() >= 1);

    let mut config = SchemaConfig::default();
    config.validation.check_constraints = false;
    let relaxed = SchemaManager::from_config(&config).validate(&doc, None).unwrap();
    assert!(relaxed.is_valid(), "{}", relaxed.summary());
}

#[test]
fn test_validate_against_unknown_version() {
    let err = SchemaManager::new()
        .validate(&plan_v1(), Some(&version("v7.0.0")))
        .unwrap_err();
    assert!(err.is_version_error());
}

#[test]
fn test_validate_without_version() {
    let mut doc = plan_v1();
    doc.remove("meta");
    let err = SchemaManager::new().validate(&doc, None).unwrap_err();
    assert!(matches!(err, SchemaError::MissingVersion));
}

#[test]
fn test_line_item_validated_on_its_own() {
    let manager = SchemaManager::new();
    let plan = plan_v1().to_value();
    let item = &plan["lineitems"][0];

    let result = manager.validate_component(item, "lineitem", None).unwrap();
    assert!(result.is_valid(), "{}", result.summary());

    let mut broken = item.clone();
    broken.as_object_mut().unwrap().remove("cost_total");
    broken["location_type"] = json!("Planet");
    let result = manager.validate_component(&broken, "lineitem", None).unwrap();
    let found: Vec<_> = result.iter().map(|e| (e.path.as_str(), e.kind)).collect();
    assert_eq!(
        found,
        vec![
            ("cost_total", ValidationErrorKind::MissingField),
            ("location_type", ValidationErrorKind::InvalidEnumValue),
        ]
    );

    // The same item is a v0 line item only with a budget
    let v0 = version("v0.0.0");
    let result = manager.validate_component(item, "lineitem", Some(&v0)).unwrap();
    assert!(result.iter().any(|e| e.path == "budget"));

    let err = manager.validate_component(item, "creative", None).unwrap_err();
    assert!(matches!(err, SchemaError::UnknownComponent { .. }));
}

#[test]
fn test_validate_file() {
    let dir = TempDir::new().unwrap();
    let manager = SchemaManager::new();

    let good = dir.path().join("plan.json");
    fs::write(&good, include_str!("fixtures/plan_v1.json")).unwrap();
    assert!(manager.validate_file(&good, None).unwrap().is_valid());

    // Same bytes against the older version: not a file error, just findings
    let against_v0 = manager.validate_file(&good, Some(&version("v0.0.0"))).unwrap();
    assert!(!against_v0.is_valid());

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ \"meta\": ").unwrap();
    assert!(matches!(
        manager.validate_file(&broken, None).unwrap_err(),
        SchemaError::FileRead { .. }
    ));

    let missing = dir.path().join("missing.json");
    assert!(matches!(
        manager.validate_file(Path::new(&missing), None).unwrap_err(),
        SchemaError::FileRead { .. }
    ));
}

// =============================================================================
// Migration
// =============================================================================

#[test]
fn test_migrating_to_same_version_is_identity() {
    let manager = SchemaManager::new();
    let plan = plan_v1();
    let out = manager.migrate(&plan, &version("v1.0.0"), Some(&version("v1.0.0"))).unwrap();
    assert_eq!(out, plan);
}

#[test]
fn test_bundled_upgrade_produces_valid_plan() {
    let manager = SchemaManager::new();
    let source = plan_v0();
    let before = source.clone();

    let migrated = manager.migrate(&source, &version("v0.0.0"), None).unwrap();
    assert_eq!(source, before, "source document must not change");

    assert_eq!(migrated.schema_version().unwrap(), Some(version("v1.0.0")));
    assert!(manager.validate(&migrated, None).unwrap().is_valid());

    assert_eq!(migrated.get_f64("campaign.budget_total"), Some(50000.0));
    assert_eq!(migrated.get_str("lineitems[0].name"), Some("li_social"));
    assert_eq!(migrated.get_str("lineitems[1].name"), Some("Display retargeting"));
    assert_eq!(migrated.get_str("lineitems[1].vehicle"), Some("DV360"));
    assert_eq!(migrated.get_str("meta.comments"), Some("Spring launch plan"));

    // Deterministic
    let again = manager.migrate(&plan_v0(), &version("v0.0.0"), None).unwrap();
    assert_eq!(migrated, again);
}

#[test]
fn test_bundled_downgrade_is_not_available() {
    let err = SchemaManager::new()
        .migrate(&plan_v1(), &version("v1.0.0"), Some(&version("v0.0.0")))
        .unwrap_err();
    assert!(matches!(err, SchemaError::Migration(MigrationError::NotReversible { .. })));
}

#[test]
fn test_upgrade_of_invalid_plan_fails_without_result() {
    let mut doc = plan_v0().to_value();
    doc["lineitems"][0].as_object_mut().unwrap().remove("id");
    doc["lineitems"][0].as_object_mut().unwrap().remove("start_date");

    let err = SchemaManager::new()
        .migrate(&Document::from_value(doc).unwrap(), &version("v0.0.0"), None)
        .unwrap_err();
    match err {
        SchemaError::Migration(MigrationError::InvalidResult { version: v, errors }) => {
            assert_eq!(v, version("v1.0.0"));
            let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(paths, vec!["lineitems[0].id", "lineitems[0].start_date"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_budget_rename_and_conversion() {
    let manager = manager_with_steps(
        vec![
            definition(
                "v0.9.0",
                json!({
                    "type": "object",
                    "required": ["meta", "budget"],
                    "properties": { "budget": { "type": "string" } }
                }),
            ),
            definition(
                "v1.0.0",
                json!({
                    "type": "object",
                    "required": ["meta", "total_budget"],
                    "properties": { "total_budget": { "type": "number" } }
                }),
            ),
        ],
        vec![MigrationStep::new(version("v0.9.0"), version("v1.0.0"))
            .rule(FieldRule::rename("budget", "total_budget"))
            .rule(FieldRule::convert("total_budget", Conversion::StringToNumber))],
    );

    let doc = Document::from_value(json!({ "meta": { "schema_version": "v0.9.0" }, "budget": "1000" })).unwrap();
    let out = manager.migrate(&doc, &version("v0.9.0"), Some(&version("v1.0.0"))).unwrap();
    assert_eq!(
        out.to_value(),
        json!({ "meta": { "schema_version": "v1.0.0" }, "total_budget": 1000 })
    );
}

fn three_version_manager() -> SchemaManager {
    manager_with_steps(
        vec![
            definition(
                "v1.0.0",
                json!({ "type": "object", "required": ["meta"], "properties": { "a": { "type": "string" } } }),
            ),
            definition(
                "v2.0.0",
                json!({ "type": "object", "required": ["meta", "b"], "properties": { "b": { "type": "string" } } }),
            ),
            definition(
                "v3.0.0",
                json!({
                    "type": "object",
                    "required": ["meta", "b", "c"],
                    "properties": { "b": { "type": "number" }, "c": { "type": "string" } }
                }),
            ),
        ],
        vec![
            MigrationStep::new(version("v1.0.0"), version("v2.0.0"))
                .rule(FieldRule::rename("a", "b"))
                .rule(FieldRule::default_value("b", json!("0")))
                .reversible(),
            MigrationStep::new(version("v2.0.0"), version("v3.0.0"))
                .rule(FieldRule::convert("b", Conversion::StringToNumber))
                .rule(FieldRule::default_value("c", json!("n/a")))
                .reversible(),
        ],
    )
}

#[test]
fn test_migration_steps_compose() {
    let manager = three_version_manager();
    let (v1, v2, v3) = (version("v1.0.0"), version("v2.0.0"), version("v3.0.0"));

    for doc in [
        json!({ "meta": { "schema_version": "v1.0.0" }, "a": "42" }),
        json!({ "meta": { "schema_version": "v1.0.0" } }),
    ] {
        let doc = Document::from_value(doc).unwrap();
        let direct = manager.migrate(&doc, &v1, Some(&v3)).unwrap();
        let middle = manager.migrate(&doc, &v1, Some(&v2)).unwrap();
        let stepwise = manager.migrate(&middle, &v2, Some(&v3)).unwrap();
        assert_eq!(direct, stepwise);
        assert!(manager.validate(&direct, Some(&v3)).unwrap().is_valid());
    }
}

#[test]
fn test_reversible_chain_downgrades() {
    let manager = three_version_manager();
    let doc = Document::from_value(json!({ "meta": { "schema_version": "v3.0.0" }, "b": 42, "c": "x" })).unwrap();

    let down = manager.migrate(&doc, &version("v3.0.0"), Some(&version("v1.0.0"))).unwrap();
    assert_eq!(
        down.to_value(),
        json!({ "meta": { "schema_version": "v1.0.0" }, "a": "42", "c": "x" })
    );
}

#[test]
fn test_gap_in_chain_is_an_error() {
    let manager = manager_with_steps(
        vec![
            definition("v1.0.0", json!({ "type": "object" })),
            definition("v1.1.0", json!({ "type": "object" })),
            definition("v1.2.0", json!({ "type": "object" })),
        ],
        vec![MigrationStep::new(version("v1.0.0"), version("v1.1.0"))],
    );
    let doc = Document::from_value(json!({ "meta": { "schema_version": "v1.0.0" } })).unwrap();

    let err = manager.migrate(&doc, &version("v1.0.0"), None).unwrap_err();
    match err {
        SchemaError::Migration(MigrationError::MissingStep { from, to }) => {
            assert_eq!(from, version("v1.1.0"));
            assert_eq!(to, version("v1.2.0"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.migrate(&doc, &version("v1.0.0"), Some(&version("v1.1.0"))).is_ok());
}

#[test]
fn test_shared_manager_across_threads() {
    let manager = SchemaManager::new();
    let v0 = plan_v0();
    let v1 = plan_v1();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                assert!(manager.validate(&v1, None).unwrap().is_valid());
                let migrated = manager.migrate(&v0, &version("v0.0.0"), None).unwrap();
                assert!(manager.validate(&migrated, None).unwrap().is_valid());
            });
        }
    });
}
