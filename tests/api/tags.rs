use chimp_sync::mailchimp::TagStatus;
use chimp_sync::subscriber::SyncStatus;
use chimp_sync::sync::modify_subscriber_tags;
use chimp_sync::sync::subscribe;
use serde_json::json;

use crate::helpers::hash_of;
use crate::helpers::spawn_app;
use crate::helpers::LIST_ID;

#[tokio::test]
async fn stale_tags_are_deactivated_when_the_policy_is_on() {
    let app = spawn_app().await;
    let email = "subscriber@example.com";
    app.mock_member_found(email, "subscribed").await;
    app.mock_update(email, "subscribed").await;
    app.mock_member_tags(email, &["A", "B"]).await;
    app.mock_tag_update(email).await;

    let mut list = app.list();
    list.remove_stale_tags = true;

    let mut sub = app.subscriber("Jane Doe", email);
    sub.tags = vec!["B".to_string(), "C".to_string()];

    let status = subscribe(&mut sub, &app.client, &list, &app.cfg.sync).await;
    assert_eq!(status, SyncStatus::Success);

    let bodies = app
        .requests_to(
            "POST",
            &format!("/lists/{LIST_ID}/members/{}/tags", hash_of(email)),
        )
        .await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        json!({"tags": [
            {"name": "A", "status": "inactive"},
            {"name": "B", "status": "active"},
            {"name": "C", "status": "active"},
        ]})
    );

    // the recorded delta also keeps what was on the member beforehand
    assert_eq!(sub.tag_delta(Some(TagStatus::Inactive)).len(), 1);
    assert_eq!(sub.tag_delta(Some(TagStatus::Active)).len(), 2);
    assert_eq!(sub.tag_delta(Some(TagStatus::Current)).len(), 2);
}

#[tokio::test]
async fn default_policy_never_deactivates() {
    let app = spawn_app().await;
    let email = "subscriber@example.com";
    app.mock_member_found(email, "subscribed").await;
    app.mock_update(email, "subscribed").await;
    app.mock_member_tags(email, &["A", "B"]).await;
    app.mock_tag_update(email).await;

    let mut sub = app.subscriber("Jane Doe", email);
    sub.tags = vec!["B".to_string(), "C".to_string()];

    let status = subscribe(&mut sub, &app.client, &app.list(), &app.cfg.sync).await;
    assert_eq!(status, SyncStatus::Success);

    // "A" is unknown to the record, but survives: the default is additive
    let bodies = app
        .requests_to(
            "POST",
            &format!("/lists/{LIST_ID}/members/{}/tags", hash_of(email)),
        )
        .await;
    assert_eq!(
        bodies[0],
        json!({"tags": [
            {"name": "B", "status": "active"},
            {"name": "C", "status": "active"},
        ]})
    );
    assert_eq!(sub.tag_delta(Some(TagStatus::Inactive)).len(), 0);
}

#[tokio::test]
async fn list_config_tags_are_added_to_the_desired_set() {
    let app = spawn_app().await;
    let email = "subscriber@example.com";
    app.mock_member_found(email, "subscribed").await;
    app.mock_update(email, "subscribed").await;
    app.mock_member_tags(email, &[]).await;
    app.mock_tag_update(email).await;

    let mut list = app.list();
    list.tags = vec!["from-config".to_string()];

    let mut sub = app.subscriber("Jane Doe", email);
    sub.tags = vec!["own-tag".to_string()];

    subscribe(&mut sub, &app.client, &list, &app.cfg.sync).await;

    let bodies = app
        .requests_to(
            "POST",
            &format!("/lists/{LIST_ID}/members/{}/tags", hash_of(email)),
        )
        .await;
    assert_eq!(
        bodies[0],
        json!({"tags": [
            {"name": "own-tag", "status": "active"},
            {"name": "from-config", "status": "active"},
        ]})
    );
}

#[tokio::test]
async fn tags_can_be_modified_after_obfuscation() {
    let app = spawn_app().await;
    let email = "subscriber@example.com";
    app.mock_member_tags(email, &["keep"]).await;
    app.mock_tag_update(email).await;

    // a record that already synced: identifiers captured, PII obfuscated
    let mut sub = app.subscriber("Jane Doe", email);
    sub.member_id = hash_of(email);
    sub.email = "s\u{2022}\u{2022}\u{2022}m".to_string();
    sub.status = SyncStatus::Success;
    sub.tags = vec!["keep".to_string(), "extra".to_string()];

    // the captured hash addresses the member; the obfuscated address is never
    // consulted
    let delta = modify_subscriber_tags(&mut sub, &app.client, &app.list())
        .await
        .unwrap();

    assert!(delta.contains(&chimp_sync::mailchimp::TagUpdate {
        name: "extra".to_string(),
        status: TagStatus::Active,
    }));
    let bodies = app
        .requests_to(
            "POST",
            &format!("/lists/{LIST_ID}/members/{}/tags", hash_of(email)),
        )
        .await;
    assert_eq!(
        bodies[0],
        json!({"tags": [
            {"name": "keep", "status": "active"},
            {"name": "extra", "status": "active"},
        ]})
    );
}
