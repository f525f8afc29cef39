// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Statement compilation properties.

use metadal::{
    prelude::*,
    query::{Plan, QueryCompiler, Statement}
};
use serde_json::json;
use uuid::Uuid;

fn service() -> ServiceMetadata {
    ServiceMetadata::from_json(json!({
        "service": "helpdesk",
        "entities": [{
            "name": "Ticket",
            "fields": [
                { "name": "title", "type": "text" },
                { "name": "status", "type": "text" },
                { "name": "priority", "type": "integer" }
            ],
            "policy": { "soft_delete": true, "optimistic_locking": true }
        }]
    }))
    .unwrap()
}

fn nested_query() -> Query {
    serde_json::from_value(json!({
        "where": [
            { "field": "status", "op": "in", "value": ["open", "pending"] },
            { "or": [
                { "field": "priority", "op": "between", "value": [2, 4] },
                { "and": [
                    { "field": "title", "op": "ilike", "value": "%printer%" },
                    { "field": "priority", "op": "is_null" }
                ]}
            ]}
        ],
        "order_by": [{ "field": "priority", "direction": "desc" }],
        "limit": 10
    }))
    .unwrap()
}

fn filter_matches(statement: &Statement, row: &Record) -> bool {
    match &statement.plan {
        Plan::Select(p) => p.filter.matches(row, &statement.args),
        Plan::Update(p) => p.filter.matches(row, &statement.args),
        Plan::Delete(p) => p.filter.matches(row, &statement.args),
        Plan::Insert(_) => true
    }
}

#[test]
fn placeholders_match_arguments_in_traversal_order() {
    let service = service();
    let entity = service.entity("Ticket").unwrap();
    let tenant = TenantId::new("t1").unwrap();
    let statement = QueryCompiler::new(entity, &tenant, "tenant_")
        .select(&nested_query())
        .unwrap();
    assert_eq!(statement.placeholder_count(), statement.args.len());
    assert_eq!(
        statement.args,
        vec![
            Value::from("t1"),
            Value::from("open"),
            Value::from("pending"),
            Value::Int(2),
            Value::Int(4),
            Value::from("%printer%"),
        ]
    );
    let count = QueryCompiler::new(entity, &tenant, "tenant_")
        .count(&nested_query())
        .unwrap();
    assert_eq!(count.args, statement.args);
}

#[test]
fn unknown_fields_produce_no_statement() {
    let service = service();
    let entity = service.entity("Ticket").unwrap();
    let tenant = TenantId::new("t1").unwrap();
    let compiler = QueryCompiler::new(entity, &tenant, "tenant_");
    for query in [
        Query::new().filter(Condition::eq("owner", "bob")),
        Query::new().filter(Condition::or(vec![
            Condition::eq("status", "open"),
            Condition::is_null("owner"),
        ])),
        Query::new().select(["title", "owner"]),
        Query::new().order_by("owner", SortDirection::Asc)
    ] {
        let err = compiler.select(&query).unwrap_err();
        assert!(
            matches!(&err, DalError::UnknownField { field, .. } if field == "owner"),
            "{err}"
        );
    }
}

#[test]
fn statements_cannot_reach_other_tenants() {
    let service = service();
    let entity = service.entity("Ticket").unwrap();
    let (t1, t2) = (TenantId::new("t1").unwrap(), TenantId::new("t2").unwrap());
    let id = Uuid::now_v7();
    let row_of = |tenant: &str| {
        Record::new()
            .with("id", id)
            .with("tenant_id", tenant)
            .with("status", "open")
            .with("version", 1)
            .with("deleted_at", Value::Null)
    };
    let patch = Record::new().with("status", "closed");
    let query = Query::new().filter(Condition::eq("status", "open"));
    let compile = |tenant: &TenantId| {
        let c = QueryCompiler::new(entity, tenant, "tenant_");
        vec![
            c.select(&query).unwrap(),
            c.select_by_id(id),
            c.update(id, &patch, Some(1)).unwrap(),
            c.delete(id, Some(1)),
            c.soft_delete(id, None, chrono::Utc::now(), Some(1)).unwrap(),
        ]
    };

    for (a, b) in compile(&t1).iter().zip(compile(&t2).iter()) {
        assert_ne!(a.args[0], b.args[0]);
        assert_ne!(a.plan.target(), b.plan.target());
        assert!(filter_matches(a, &row_of("t1")), "{}", a.sql);
        assert!(!filter_matches(a, &row_of("t2")), "{}", a.sql);
        assert!(!filter_matches(b, &row_of("t1")), "{}", b.sql);
    }

    let insert = QueryCompiler::new(entity, &t1, "tenant_")
        .insert(&row_of("t2"))
        .unwrap();
    assert!(insert.args.contains(&Value::from("t1")));
    assert!(!insert.args.contains(&Value::from("t2")));
}
