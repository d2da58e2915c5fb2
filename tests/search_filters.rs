//! Filtered searches over a small user population.

mod common;

use common::fixtures::{employee, search_population};
use common::{Engine, admin, create, engine};
use scim_engine::ScimError;
use scim_engine::error::{OutcomeCode, ValidationError};
use scim_engine::resource::ListQuery;
use serde_json::json;

async fn populated() -> Engine {
    let engine = engine();
    for user in search_population() {
        create(&engine, "User", user).await;
    }
    engine
}

async fn user_names(engine: &Engine, filter: &str) -> Vec<String> {
    let result = engine
        .search("User", &ListQuery::new().with_filter(filter), &admin())
        .await
        .unwrap_or_else(|e| panic!("search '{}' failed: {}", filter, e));
    let mut names: Vec<String> = result
        .resources()
        .iter()
        .filter_map(|r| r.get("userName").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_work_email_at_com_matches_only_alice() {
    let engine = populated().await;
    let names = user_names(
        &engine,
        r#"emails.type eq "work" and emails.value co "com""#,
    )
    .await;
    assert_eq!(names, vec!["alice"]);

    let result = engine
        .search(
            "User",
            &ListQuery::new().with_filter(r#"emails.type eq "work" and emails.value co "com""#),
            &admin(),
        )
        .await
        .unwrap();
    assert_eq!(result.total_results, 1);
    assert_eq!(result.start_index, 1);
}

#[tokio::test]
async fn test_value_path_filters_one_element() {
    let engine = populated().await;
    assert_eq!(
        user_names(&engine, r#"emails[type eq "work" and value ew ".org"]"#).await,
        vec!["bob"]
    );
    assert!(
        user_names(&engine, r#"emails[type eq "home" and value co "work"]"#)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_string_matching_ignores_case() {
    let engine = populated().await;
    assert_eq!(user_names(&engine, r#"USERNAME eq "ALICE""#).await, vec!["alice"]);
    assert_eq!(user_names(&engine, r#"userName sw "C""#).await, vec!["carol"]);
    assert_eq!(
        user_names(&engine, r#"emails co "WORK""#).await,
        vec!["alice", "bob"]
    );
}

#[tokio::test]
async fn test_presence_and_null() {
    let engine = populated().await;
    assert_eq!(
        user_names(&engine, "emails pr").await,
        vec!["alice", "bob", "carol"]
    );
    assert_eq!(user_names(&engine, "emails eq null").await, vec!["dave"]);
    assert_eq!(
        user_names(&engine, "not (emails pr) or userName eq \"bob\"").await,
        vec!["bob", "dave"]
    );
}

#[tokio::test]
async fn test_presence_of_complex_attributes() {
    let engine = populated().await;
    create(
        &engine,
        "User",
        json!({
            "userName": "erin",
            "name": {"givenName": "Erin"},
            "addresses": [{"locality": "Austin"}]
        }),
    )
    .await;

    assert_eq!(user_names(&engine, "name pr").await, vec!["erin"]);
    assert_eq!(user_names(&engine, "addresses pr").await, vec!["erin"]);
    assert_eq!(user_names(&engine, "name.givenName pr").await, vec!["erin"]);
    assert!(user_names(&engine, "name.familyName pr").await.is_empty());
    assert_eq!(user_names(&engine, "not (name pr)").await.len(), 4);
}

#[tokio::test]
async fn test_unknown_attribute_matches_nothing() {
    let engine = populated().await;
    assert!(user_names(&engine, r#"shoeSize eq "44""#).await.is_empty());
    assert_eq!(
        user_names(&engine, r#"shoeSize eq "44" or userName eq "dave""#).await,
        vec!["dave"]
    );
}

#[tokio::test]
async fn test_extension_and_meta_attributes() {
    let engine = populated().await;
    create(&engine, "User", employee("erin", "1001", "Finance")).await;
    create(&engine, "User", employee("frank", "1002", "Sales")).await;

    assert_eq!(
        user_names(
            &engine,
            r#"urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:department eq "finance""#
        )
        .await,
        vec!["erin"]
    );
    assert_eq!(
        user_names(&engine, r#"meta.resourceType eq "User" and userName sw "e""#).await,
        vec!["erin"]
    );
    assert_eq!(
        user_names(&engine, r#"meta.created gt "2000-01-01T00:00:00Z""#).await.len(),
        6
    );
}

#[tokio::test]
async fn test_malformed_filters_are_client_errors() {
    let engine = populated().await;
    for filter in [
        r#"userName eq"#,
        r#"userName xx "alice""#,
        r#"(userName eq "alice""#,
        r#"emails[type eq "work""#,
        r#"active co "t""#,
        r#"meta.created gt "last week""#,
    ] {
        let err = engine
            .search("User", &ListQuery::new().with_filter(filter), &admin())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), OutcomeCode::BadRequest, "filter {}", filter);
        assert_eq!(err.scim_type(), Some("invalidFilter"), "filter {}", filter);
    }

    let err = engine
        .search("User", &ListQuery::new().with_filter("userName eq"), &admin())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScimError::Validation(ValidationError::InvalidFilter { .. })
    ));
}

#[tokio::test]
async fn test_blank_filter_lists_everything() {
    let engine = populated().await;
    let result = engine
        .search("User", &ListQuery::new().with_filter("   "), &admin())
        .await
        .unwrap();
    assert_eq!(result.total_results, 4);
}

#[tokio::test]
async fn test_search_projects_requested_attributes() {
    let engine = populated().await;
    let result = engine
        .search(
            "User",
            &ListQuery::new()
                .with_filter(r#"userName eq "alice""#)
                .with_attributes(["emails.value"]),
            &admin(),
        )
        .await
        .unwrap();
    let alice = &result.resources()[0];
    assert_eq!(alice["emails"], json!([{"value": "alice@work.com"}]));
    assert!(alice.get("userName").is_none());
    assert!(alice.get("id").is_some());
}
