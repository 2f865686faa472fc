//! Scenario tests for the check engine: direct tuples, computed relations,
//! set operators, wildcards, usersets, conditions, contextual tuples and
//! safety limits.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use crate::error::DomainError;
use crate::model::{
    AuthorizationModel, ConditionDefinition, RewriteUserset, TypeDefinition, TypeRestriction,
};
use crate::resolver::{CheckRequest, CheckResolverConfig};

use super::mocks::{
    counting_engine, document_model, engine, key, relation, tuple, STORE,
};

fn this_viewer_model() -> AuthorizationModel {
    document_model(vec![relation(
        "viewer",
        RewriteUserset::This,
        vec![TypeRestriction::direct("user")],
    )])
}

// ========== Direct tuples ==========

#[tokio::test]
async fn test_direct_tuple_allows_access() {
    let engine = engine(
        this_viewer_model(),
        vec![tuple("document:1", "viewer", "user:alice")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(response.allowed);
    assert_eq!(response.metadata.datastore_query_count, 1);
    assert!(!response.metadata.cycle_detected);
}

#[tokio::test]
async fn test_no_tuple_denies_access() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(!response.allowed);
}

#[tokio::test]
async fn test_query_count_reflects_reads_issued() {
    // A miss on a relation restricted to terminal users costs exactly the
    // exact-match read: no wildcard or userset is permitted, so neither
    // read is issued.
    let (engine, store) = counting_engine(
        this_viewer_model(),
        vec![],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(!response.allowed);
    assert_eq!(response.metadata.datastore_query_count, 1);
    assert_eq!(store.reads(), 1);
}

// ========== Computed usersets ==========

fn viewer_or_owner_model() -> AuthorizationModel {
    document_model(vec![
        relation(
            "viewer",
            RewriteUserset::Union {
                children: vec![
                    RewriteUserset::This,
                    RewriteUserset::ComputedUserset {
                        relation: "owner".to_string(),
                    },
                ],
            },
            vec![TypeRestriction::direct("user")],
        ),
        relation(
            "owner",
            RewriteUserset::This,
            vec![TypeRestriction::direct("user")],
        ),
    ])
}

#[tokio::test]
async fn test_computed_userset_grants_through_owner() {
    let engine = engine(
        viewer_or_owner_model(),
        vec![tuple("document:1", "owner", "user:alice")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(response.allowed);
    assert!(response.metadata.dispatch_count >= 1);
}

#[tokio::test]
async fn test_union_is_commutative_over_children() {
    let reversed = document_model(vec![
        relation(
            "viewer",
            RewriteUserset::Union {
                children: vec![
                    RewriteUserset::ComputedUserset {
                        relation: "owner".to_string(),
                    },
                    RewriteUserset::This,
                ],
            },
            vec![TypeRestriction::direct("user")],
        ),
        relation(
            "owner",
            RewriteUserset::This,
            vec![TypeRestriction::direct("user")],
        ),
    ]);

    for model in [viewer_or_owner_model(), reversed] {
        let engine = engine(
            model,
            vec![tuple("document:1", "owner", "user:alice")],
            CheckResolverConfig::default(),
        );
        let response = engine
            .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
            .await
            .unwrap();
        assert!(response.allowed);
    }
}

// ========== Tuple-to-userset ==========

fn parent_viewer_model() -> AuthorizationModel {
    AuthorizationModel::new(vec![
        TypeDefinition::new("user", vec![]),
        TypeDefinition::new(
            "folder",
            vec![relation(
                "viewer",
                RewriteUserset::This,
                vec![TypeRestriction::direct("user")],
            )],
        ),
        TypeDefinition::new(
            "document",
            vec![
                relation(
                    "parent",
                    RewriteUserset::This,
                    vec![TypeRestriction::direct("folder")],
                ),
                relation(
                    "viewer",
                    RewriteUserset::TupleToUserset {
                        tupleset: "parent".to_string(),
                        computed_relation: "viewer".to_string(),
                    },
                    vec![],
                ),
            ],
        ),
    ])
}

#[tokio::test]
async fn test_tuple_to_userset_grants_through_parent() {
    let engine = engine(
        parent_viewer_model(),
        vec![
            tuple("document:1", "parent", "folder:x"),
            tuple("folder:x", "viewer", "user:alice"),
        ],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(response.allowed);
    assert!(response.metadata.dispatch_count >= 1);
}

#[tokio::test]
async fn test_tuple_to_userset_ignores_users_without_computed_relation() {
    // The tupleset points at a user, which has no "viewer" relation; the
    // branch is skipped rather than failing.
    let engine = engine(
        parent_viewer_model(),
        vec![tuple("document:1", "parent", "user:bob")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(!response.allowed);
}

// ========== Intersection ==========

fn editor_intersection_model() -> AuthorizationModel {
    document_model(vec![
        relation(
            "viewer",
            RewriteUserset::This,
            vec![TypeRestriction::direct("user")],
        ),
        relation(
            "member",
            RewriteUserset::This,
            vec![TypeRestriction::direct("user")],
        ),
        relation(
            "editor",
            RewriteUserset::Intersection {
                children: vec![
                    RewriteUserset::ComputedUserset {
                        relation: "viewer".to_string(),
                    },
                    RewriteUserset::ComputedUserset {
                        relation: "member".to_string(),
                    },
                ],
            },
            vec![],
        ),
    ])
}

#[tokio::test]
async fn test_intersection_requires_all_children() {
    let engine = engine(
        editor_intersection_model(),
        vec![tuple("document:1", "viewer", "user:a")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "editor", "user:a")))
        .await
        .unwrap();
    assert!(!response.allowed, "viewer without member must be denied");
}

#[tokio::test]
async fn test_intersection_allows_when_all_children_allow() {
    let engine = engine(
        editor_intersection_model(),
        vec![
            tuple("document:1", "viewer", "user:a"),
            tuple("document:1", "member", "user:a"),
        ],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "editor", "user:a")))
        .await
        .unwrap();
    assert!(response.allowed);
}

// ========== Difference ==========

fn viewer_minus_banned_model() -> AuthorizationModel {
    document_model(vec![
        relation(
            "granted",
            RewriteUserset::This,
            vec![TypeRestriction::direct("user")],
        ),
        relation(
            "banned",
            RewriteUserset::This,
            vec![TypeRestriction::direct("user")],
        ),
        relation(
            "viewer",
            RewriteUserset::Difference {
                base: Box::new(RewriteUserset::ComputedUserset {
                    relation: "granted".to_string(),
                }),
                subtract: Box::new(RewriteUserset::ComputedUserset {
                    relation: "banned".to_string(),
                }),
            },
            vec![],
        ),
    ])
}

#[tokio::test]
async fn test_difference_grants_base_minus_subtract() {
    let engine = engine(
        viewer_minus_banned_model(),
        vec![
            tuple("document:1", "granted", "user:alice"),
            tuple("document:1", "granted", "user:bob"),
            tuple("document:1", "banned", "user:bob"),
        ],
        CheckResolverConfig::default(),
    );

    let alice = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(alice.allowed);

    let bob = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:bob")))
        .await
        .unwrap();
    assert!(!bob.allowed);
}

// ========== Cycles ==========

#[tokio::test]
async fn test_cycle_is_denied_not_an_error() {
    let model = document_model(vec![
        relation(
            "a",
            RewriteUserset::ComputedUserset {
                relation: "b".to_string(),
            },
            vec![],
        ),
        relation(
            "b",
            RewriteUserset::ComputedUserset {
                relation: "a".to_string(),
            },
            vec![],
        ),
    ]);
    let engine = engine(model, vec![], CheckResolverConfig::default());

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "a", "user:x")))
        .await
        .unwrap();
    assert!(!response.allowed);
    assert!(response.metadata.cycle_detected);
}

// ========== Wildcards ==========

fn wildcard_viewer_model() -> AuthorizationModel {
    document_model(vec![relation(
        "viewer",
        RewriteUserset::This,
        vec![
            TypeRestriction::direct("user"),
            TypeRestriction::wildcard("user"),
        ],
    )])
}

#[tokio::test]
async fn test_wildcard_grants_any_user_of_its_type() {
    let engine = engine(
        wildcard_viewer_model(),
        vec![tuple("document:1", "viewer", "user:*")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:bob")))
        .await
        .unwrap();
    assert!(response.allowed);
}

#[tokio::test]
async fn test_wildcard_requires_model_permission() {
    // The same wildcard tuple grants nothing when the relation's type
    // restrictions do not permit "user:*".
    let engine = engine(
        this_viewer_model(),
        vec![tuple("document:1", "viewer", "user:*")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:bob")))
        .await
        .unwrap();
    assert!(!response.allowed);
}

#[tokio::test]
async fn test_wildcard_request_user_is_rejected() {
    let engine = engine(wildcard_viewer_model(), vec![], CheckResolverConfig::default());

    let result = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:*")))
        .await;
    assert!(matches!(result, Err(DomainError::InvalidUserFormat { .. })));
}

// ========== Usersets ==========

fn group_member_model() -> AuthorizationModel {
    AuthorizationModel::new(vec![
        TypeDefinition::new("user", vec![]),
        TypeDefinition::new(
            "group",
            vec![relation(
                "member",
                RewriteUserset::This,
                vec![TypeRestriction::direct("user")],
            )],
        ),
        TypeDefinition::new(
            "document",
            vec![relation(
                "viewer",
                RewriteUserset::This,
                vec![
                    TypeRestriction::direct("user"),
                    TypeRestriction::userset("group", "member"),
                ],
            )],
        ),
    ])
}

#[tokio::test]
async fn test_userset_tuple_expands_to_membership_check() {
    let engine = engine(
        group_member_model(),
        vec![
            tuple("document:1", "viewer", "group:eng#member"),
            tuple("group:eng", "member", "user:alice"),
        ],
        CheckResolverConfig::default(),
    );

    let alice = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(alice.allowed);
    assert!(alice.metadata.dispatch_count >= 1);

    let mallory = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:mallory")))
        .await
        .unwrap();
    assert!(!mallory.allowed);
}

// ========== Contextual tuples ==========

#[tokio::test]
async fn test_contextual_tuple_grants_access() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let request = CheckRequest::new(STORE, key("document:1", "viewer", "user:alice"))
        .with_contextual_tuples(vec![tuple("document:1", "viewer", "user:alice")]);
    let response = engine.check(request).await.unwrap();
    assert!(response.allowed);
    assert_eq!(response.metadata.datastore_query_count, 1);
}

#[tokio::test]
async fn test_contextual_tuple_matches_stored_semantics() {
    // Overlaying the tuple contextually is equivalent to having it stored.
    let stored = engine(
        this_viewer_model(),
        vec![tuple("document:1", "viewer", "user:alice")],
        CheckResolverConfig::default(),
    );
    let overlaid = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let plain = CheckRequest::new(STORE, key("document:1", "viewer", "user:alice"));
    let with_ct = plain
        .clone()
        .with_contextual_tuples(vec![tuple("document:1", "viewer", "user:alice")]);

    let from_store = stored.check(plain).await.unwrap();
    let from_overlay = overlaid.check(with_ct).await.unwrap();
    assert_eq!(from_store.allowed, from_overlay.allowed);
}

#[tokio::test]
async fn test_contextual_tuple_is_validated_against_model() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let request = CheckRequest::new(STORE, key("document:1", "viewer", "user:alice"))
        .with_contextual_tuples(vec![tuple("document:1", "editor", "user:alice")]);
    let result = engine.check(request).await;
    assert!(matches!(result, Err(DomainError::RelationNotFound { .. })));
}

// ========== Conditions ==========

fn conditioned_viewer_model() -> AuthorizationModel {
    document_model(vec![relation(
        "viewer",
        RewriteUserset::This,
        vec![TypeRestriction::direct("user")],
    )])
    .with_conditions(vec![ConditionDefinition::new(
        "from_office",
        "context.ip == \"10.0.0.1\"",
    )])
}

#[tokio::test]
async fn test_condition_gates_the_tuple() {
    let engine = engine(
        conditioned_viewer_model(),
        vec![tuple("document:1", "viewer", "user:alice").with_condition("from_office")],
        CheckResolverConfig::default(),
    );

    let matching = CheckRequest::new(STORE, key("document:1", "viewer", "user:alice"))
        .with_context(HashMap::from([("ip".to_string(), json!("10.0.0.1"))]));
    assert!(engine.check(matching).await.unwrap().allowed);

    let other = CheckRequest::new(STORE, key("document:1", "viewer", "user:alice"))
        .with_context(HashMap::from([("ip".to_string(), json!("10.9.9.9"))]));
    assert!(!engine.check(other).await.unwrap().allowed);
}

#[tokio::test]
async fn test_condition_evaluation_failure_is_an_error() {
    let engine = engine(
        conditioned_viewer_model(),
        vec![tuple("document:1", "viewer", "user:alice").with_condition("from_office")],
        CheckResolverConfig::default(),
    );

    // No "ip" in the request context: evaluation fails, it is not a denial.
    let result = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await;
    assert!(matches!(
        result,
        Err(DomainError::ConditionEvaluationFailed { .. })
    ));
}

#[tokio::test]
async fn test_tuple_condition_context_shadows_request_context() {
    let model = document_model(vec![relation(
        "can_transfer",
        RewriteUserset::This,
        vec![TypeRestriction::direct("user")],
    )])
    .with_conditions(vec![ConditionDefinition::new(
        "under_limit",
        "context.amount <= context.max_amount",
    )]);
    // The limit is bound at write time; callers cannot raise it.
    let conditioned = tuple("document:1", "can_transfer", "user:alice")
        .with_condition("under_limit")
        .with_condition_context(HashMap::from([("max_amount".to_string(), json!(100))]));
    let engine = engine(model, vec![conditioned], CheckResolverConfig::default());

    let small = CheckRequest::new(STORE, key("document:1", "can_transfer", "user:alice"))
        .with_context(HashMap::from([
            ("amount".to_string(), json!(50)),
            ("max_amount".to_string(), json!(1_000_000)),
        ]));
    assert!(engine.check(small).await.unwrap().allowed);

    let large = CheckRequest::new(STORE, key("document:1", "can_transfer", "user:alice"))
        .with_context(HashMap::from([
            ("amount".to_string(), json!(500)),
            ("max_amount".to_string(), json!(1_000_000)),
        ]));
    assert!(!engine.check(large).await.unwrap().allowed);
}

#[tokio::test]
async fn test_unknown_condition_is_an_error() {
    let engine = engine(
        this_viewer_model(),
        vec![tuple("document:1", "viewer", "user:alice").with_condition("missing")],
        CheckResolverConfig::default(),
    );

    let result = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await;
    assert!(matches!(result, Err(DomainError::ConditionNotFound { .. })));
}

// ========== Limits ==========

fn computed_chain_model(hops: usize) -> AuthorizationModel {
    let mut relations = Vec::new();
    for i in 0..hops {
        relations.push(relation(
            &format!("r{i}"),
            RewriteUserset::ComputedUserset {
                relation: format!("r{}", i + 1),
            },
            vec![],
        ));
    }
    relations.push(relation(
        &format!("r{hops}"),
        RewriteUserset::This,
        vec![TypeRestriction::direct("user")],
    ));
    document_model(relations)
}

#[tokio::test]
async fn test_resolution_depth_exceeded_maps_to_model_too_complex() {
    let engine = engine(
        computed_chain_model(5),
        vec![],
        CheckResolverConfig::default().with_resolve_node_limit(2),
    );

    let result = engine
        .check(CheckRequest::new(STORE, key("document:1", "r0", "user:x")))
        .await;
    assert!(matches!(result, Err(DomainError::ModelTooComplex)));
}

#[tokio::test]
async fn test_deep_chain_resolves_within_default_limit() {
    let engine = engine(
        computed_chain_model(5),
        vec![tuple("document:1", "r5", "user:x")],
        CheckResolverConfig::default(),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "r0", "user:x")))
        .await
        .unwrap();
    assert!(response.allowed);
    assert_eq!(response.metadata.dispatch_count, 5);
}

#[tokio::test]
async fn test_breadth_limit_of_one_still_resolves_correctly() {
    // With a single breadth permit, operator children degrade to sequential
    // evaluation; the decision must be unchanged.
    let engine = engine(
        viewer_or_owner_model(),
        vec![tuple("document:1", "owner", "user:alice")],
        CheckResolverConfig::default().with_resolve_node_breadth_limit(1),
    );

    let response = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await
        .unwrap();
    assert!(response.allowed);
}

#[tokio::test]
async fn test_deadline_exceeded_surfaces_as_error() {
    let (engine, _store) = {
        let inner = authgraph_storage::MemoryDataStore::new();
        inner
            .write_tuple(STORE, tuple("document:1", "viewer", "user:alice"))
            .unwrap();
        let store = std::sync::Arc::new(
            super::mocks::CountingDataStore::new(inner).with_delay(Duration::from_millis(100)),
        );
        let models = crate::model::InMemoryModelStore::new_shared();
        models.write_model(STORE, this_viewer_model());
        (
            crate::resolver::CheckEngine::new(
                store.clone(),
                models,
                CheckResolverConfig::default().with_request_timeout(Duration::from_millis(5)),
            ),
            store,
        )
    };

    let result = engine
        .check(CheckRequest::new(STORE, key("document:1", "viewer", "user:alice")))
        .await;
    assert!(matches!(result, Err(DomainError::DeadlineExceeded { .. })));
}

// ========== Validation ==========

#[tokio::test]
async fn test_unknown_relation_is_a_validation_error() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let result = engine
        .check(CheckRequest::new(STORE, key("document:1", "editor", "user:alice")))
        .await;
    assert!(matches!(result, Err(DomainError::RelationNotFound { .. })));
}

#[tokio::test]
async fn test_malformed_object_is_a_validation_error() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let result = engine
        .check(CheckRequest::new(STORE, key("document", "viewer", "user:alice")))
        .await;
    assert!(matches!(result, Err(DomainError::InvalidObjectFormat { .. })));
}

#[tokio::test]
async fn test_unknown_store_is_a_model_resolution_error() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());

    let result = engine
        .check(CheckRequest::new(
            "other-store",
            key("document:1", "viewer", "user:alice"),
        ))
        .await;
    assert!(matches!(
        result,
        Err(DomainError::LatestModelNotFound { .. })
    ));
}

#[tokio::test]
async fn test_engine_readiness_probe() {
    let engine = engine(this_viewer_model(), vec![], CheckResolverConfig::default());
    assert!(engine.is_ready().await.unwrap().is_ready());
}
