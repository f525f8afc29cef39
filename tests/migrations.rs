// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Metadata diff and migration across tenants.

use std::sync::Arc;

use metadal::{
    prelude::*,
    schema::{MigrationKind, StoreMigrationLog}
};
use serde_json::json;

fn version(fields: serde_json::Value) -> ServiceMetadata {
    ServiceMetadata::from_json(json!({
        "service": "inventory",
        "entities": [{ "name": "Item", "fields": fields }]
    }))
    .unwrap()
}

fn v1() -> ServiceMetadata {
    version(json!([
        { "name": "a", "type": "text" },
        { "name": "b", "type": "text" }
    ]))
}

fn v2() -> ServiceMetadata {
    version(json!([
        { "name": "b", "type": "text" },
        { "name": "c", "type": "integer" }
    ]))
}

#[test]
fn field_swap_is_one_add_and_one_drop() {
    let migrations = diff(&v1(), &v2());
    let described: Vec<(MigrationKind, String)> = migrations
        .iter()
        .map(|m| (m.kind(), m.target().to_string()))
        .collect();
    assert_eq!(migrations.len(), 2, "{described:?}");
    assert!(described.contains(&(MigrationKind::AddColumn, "c".to_string())));
    assert!(described.contains(&(MigrationKind::DropColumn, "a".to_string())));
    assert!(described.iter().all(|(_, target)| target != "b"));
    assert!(diff(&v2(), &v2()).is_empty());
}

#[tokio::test]
async fn migrated_tenants_accept_the_new_shape() {
    let store = Arc::new(MemoryStore::new());
    let config = DalConfig::new("inventory");
    let migrator = Migrator::new(store.clone(), &config).unwrap();
    let tenants = [TenantId::new("north").unwrap(), TenantId::new("south").unwrap()];
    for tenant in &tenants {
        migrator.provision_tenant(tenant, &v1()).await.unwrap();
    }

    let old = Engine::builder(Arc::new(v1()), store.clone()).build().unwrap();
    let north = Scope::new(tenants[0].clone());
    let id = old
        .create(&north, "Item", Record::new().with("a", "x").with("b", "kept"))
        .await
        .unwrap()
        .id()
        .unwrap();

    let reports = migrator.migrate(&v1(), &v2()).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_success() && r.applied == 2));

    let new = Engine::builder(Arc::new(v2()), store.clone()).build().unwrap();
    let item = new.read(&north, "Item", id).await.unwrap();
    assert_eq!(item.get("b"), Some(&Value::from("kept")));
    assert!(!item.contains("a"));
    let updated = new
        .update(&north, "Item", id, Record::new().with("c", 7))
        .await
        .unwrap();
    assert_eq!(updated.get("c"), Some(&Value::Int(7)));

    let log = StoreMigrationLog::new(store.clone(), config.schema_prefix.clone()).unwrap();
    let history = log.entries(&tenants[1]).await.unwrap();
    let kinds: Vec<_> = history
        .iter()
        .map(|e| e.get_or_null("kind").clone())
        .collect();
    assert_eq!(kinds.len(), 3);
    assert_eq!(kinds[0], Value::from("create-table"));
    assert!(history.iter().all(|e| e.get("success") == Some(&Value::Bool(true))));
}

#[tokio::test]
async fn incompatible_type_change_stops_only_that_tenant() {
    let store = Arc::new(MemoryStore::new());
    let migrator = Migrator::new(store.clone(), &DalConfig::new("inventory")).unwrap();
    let clean = TenantId::new("clean").unwrap();
    let dirty = TenantId::new("dirty").unwrap();
    for tenant in [&clean, &dirty] {
        migrator.provision_tenant(tenant, &v1()).await.unwrap();
    }
    let engine = Engine::builder(Arc::new(v1()), store.clone()).build().unwrap();
    engine
        .create(&Scope::new(dirty.clone()), "Item", Record::new().with("b", "not a number"))
        .await
        .unwrap();

    let v3 = version(json!([
        { "name": "a", "type": "text" },
        { "name": "b", "type": "integer" },
        { "name": "d", "type": "text" }
    ]));
    let migrations = diff(&v1(), &v3);
    let reports = migrator.apply_all(&[clean.clone(), dirty.clone()], &migrations).await;

    let ok = reports.iter().find(|r| r.tenant == clean).unwrap();
    assert!(ok.is_success(), "{ok:?}");
    let failed = reports.iter().find(|r| r.tenant == dirty).unwrap();
    let failure = failed.error.as_ref().unwrap();
    assert!(failure.migration.starts_with("alter-column items.b"), "{}", failure.migration);
    assert!(failed.applied < migrations.len());
}
