//! Optimistic concurrency: versions, `ifMatch` and `ifNoneMatch`.

mod common;

use common::{admin, all, create_group, create_user, engine, fetch, none, patch_ops};
use scim_engine::ScimError;
use scim_engine::config::ScimEngineBuilder;
use scim_engine::error::OutcomeCode;
use scim_engine::operation_handler::OperationRequest;
use scim_engine::resource::Preconditions;
use scim_engine::storage::InMemoryStorage;
use scim_engine::Subject;
use serde_json::json;

#[tokio::test]
async fn test_racing_conditional_writes_one_wins() {
    let engine = engine();
    let id = create_user(&engine, "admin.user").await;
    let v1 = fetch(&engine, "User", &id).await.version;
    let guard = Preconditions::if_match(v1.clone());

    let disable = patch_ops(json!([{"op": "replace", "path": "active", "value": false}]));
    let transfer = json!({"userName": "admin.user", "active": true, "title": "Security"});

    let attrs = all();
    let subject = admin();
    let (patched, replaced) = futures::join!(
        engine.patch("User", &id, &disable, &guard, &attrs, &subject),
        engine.replace("User", &id, &transfer, &guard, &attrs, &subject),
    );

    let outcomes = [patched.is_ok(), replaced.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = patched.err().or(replaced.err()).unwrap();
    match loser {
        ScimError::PreconditionFailed(conflict) => {
            assert_eq!(conflict.current.as_str(), "2");
        }
        other => panic!("expected precondition failure, got {:?}", other),
    }

    let current = fetch(&engine, "User", &id).await;
    assert_eq!(current.version.to_string(), "W/\"2\"");
}

#[tokio::test]
async fn test_stale_version_never_overwrites() {
    let engine = engine();
    let id = create_user(&engine, "bjensen").await;
    let v1 = fetch(&engine, "User", &id).await.version;

    let first = patch_ops(json!([{"op": "add", "path": "title", "value": "Lead"}]));
    engine
        .patch("User", &id, &first, &Preconditions::if_match(v1.clone()), &all(), &admin())
        .await
        .unwrap();

    let second = json!({"userName": "bjensen", "title": "Intern"});
    let err = engine
        .replace("User", &id, &second, &Preconditions::if_match(v1), &all(), &admin())
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::PreconditionFailed);

    let body = fetch(&engine, "User", &id).await.resource.unwrap();
    assert_eq!(body["title"], "Lead");
    assert_eq!(body["meta"]["version"], "W/\"2\"");
}

#[tokio::test]
async fn test_if_none_match_on_read() {
    let engine = engine();
    let id = create_user(&engine, "bjensen").await;
    let v1 = fetch(&engine, "User", &id).await.version;

    let err = engine
        .get("User", &id, &Preconditions::if_none_match(v1.clone()), &all(), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ScimError::NotModified));

    let patch = patch_ops(json!([{"op": "replace", "path": "nickName", "value": "Babs"}]));
    engine.patch("User", &id, &patch, &none(), &all(), &admin()).await.unwrap();

    let fresh = engine
        .get("User", &id, &Preconditions::if_none_match(v1), &all(), &admin())
        .await
        .unwrap();
    assert_eq!(fresh.version.to_string(), "W/\"2\"");
    assert_eq!(fresh.resource.unwrap()["nickName"], "Babs");
}

#[tokio::test]
async fn test_wildcard_tokens() {
    let engine = engine();
    let id = create_user(&engine, "bjensen").await;

    let any = Preconditions::from_tokens(Some("*"), None).unwrap();
    let patch = patch_ops(json!([{"op": "replace", "path": "title", "value": "CTO"}]));
    engine.patch("User", &id, &patch, &any, &all(), &admin()).await.unwrap();

    let none_match_any = Preconditions::from_tokens(None, Some("*")).unwrap();
    let err = engine
        .delete("User", &id, &none_match_any, &admin())
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::PreconditionFailed);
    assert_eq!(fetch(&engine, "User", &id).await.version.to_string(), "W/\"2\"");
}

#[tokio::test]
async fn test_stale_if_match_fails_even_for_redundant_patch() {
    let engine = engine();
    let alice = create_user(&engine, "alice").await;
    let group = create_group(&engine, "Admins", &[&alice]).await;
    let v1 = fetch(&engine, "Group", &group).await.version;

    let rename = patch_ops(json!([{"op": "replace", "path": "displayName", "value": "Root"}]));
    engine.patch("Group", &group, &rename, &none(), &all(), &admin()).await.unwrap();

    let redundant = patch_ops(json!([{"op": "add", "path": "members", "value": [{"value": alice}]}]));
    let err = engine
        .patch("Group", &group, &redundant, &Preconditions::if_match(v1), &all(), &admin())
        .await
        .unwrap_err();
    assert_eq!(err.outcome(), OutcomeCode::PreconditionFailed);

    let current = fetch(&engine, "Group", &group).await.version;
    let ok = engine
        .patch("Group", &group, &redundant, &Preconditions::if_match(current), &all(), &admin())
        .await
        .unwrap();
    assert_eq!(ok.version.to_string(), "W/\"2\"");
}

#[tokio::test]
async fn test_stale_delete_keeps_resource() {
    let engine = engine();
    let id = create_user(&engine, "bjensen").await;
    let stale = Preconditions::from_tokens(Some("W/\"7\""), None).unwrap();
    let err = engine.delete("User", &id, &stale, &admin()).await.unwrap_err();
    assert!(matches!(err, ScimError::PreconditionFailed(_)));
    fetch(&engine, "User", &id).await;
}

#[tokio::test]
async fn test_handler_reports_conflicting_versions() {
    common::init_logging();
    let handler = ScimEngineBuilder::new(InMemoryStorage::new())
        .build_handler()
        .unwrap();
    let created = handler
        .handle_operation(
            OperationRequest::create("User", json!({"userName": "bjensen"}))
                .with_subject(Subject::system()),
        )
        .await;
    let id = created.metadata.resource_id.unwrap();

    let response = handler
        .handle_operation(
            OperationRequest::replace("User", &id, json!({"userName": "bjensen", "title": "x"}))
                .with_subject(Subject::system())
                .with_if_match("W/\"5\""),
        )
        .await;
    assert_eq!(response.outcome, OutcomeCode::PreconditionFailed);
    assert_eq!(response.metadata.additional["expected_version"], "W/\"5\"");
    assert_eq!(response.metadata.additional["current_version"], "W/\"1\"");
    assert_eq!(response.version.unwrap().to_string(), "W/\"1\"");
}
