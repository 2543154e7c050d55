use crate::helpers::{spawn_app, TestApp};

async fn alias_destination(app: &TestApp, source: &str) -> Option<String> {
    sqlx::query_scalar("SELECT destination FROM aliases WHERE source = $1")
        .bind(source)
        .fetch_optional(&app.db_pool)
        .await
        .expect("Failed to query aliases.")
}

async fn create_alias(app: &TestApp, source: &str, destination: &str) -> reqwest::Response {
    app.post_json(
        "/aliases",
        &serde_json::json!({ "source": source, "destination": destination }),
    )
    .await
}

#[tokio::test]
async fn create_alias_stores_the_forwarding_pair() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());

    let response = create_alias(&app, "info@example.com", "team@elsewhere.org").await;

    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["source"], "info@example.com");
    assert_eq!(body["destination"], "team@elsewhere.org");
    assert_eq!(
        Some("team@elsewhere.org".to_string()),
        alias_destination(&app, "info@example.com").await
    );
}

#[tokio::test]
async fn an_alias_needs_an_existing_source_domain() {
    let app = spawn_app().await;

    let response = create_alias(&app, "info@example.com", "team@elsewhere.org").await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn the_destination_may_live_outside_managed_domains() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());

    let response = create_alias(&app, "info@example.com", "someone@gmail.com").await;

    assert_eq!(201, response.status().as_u16());
}

#[tokio::test]
async fn duplicate_alias_sources_are_a_conflict() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(
        201,
        create_alias(&app, "info@example.com", "a@elsewhere.org")
            .await
            .status()
    );

    let response = create_alias(&app, "info@example.com", "b@elsewhere.org").await;

    assert_eq!(409, response.status().as_u16());
    // The original destination is untouched.
    assert_eq!(
        Some("a@elsewhere.org".to_string()),
        alias_destination(&app, "info@example.com").await
    );
}

#[tokio::test]
async fn an_alias_cannot_shadow_a_mailbox() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@example.com").await.status());

    let response = create_alias(&app, "a@example.com", "team@elsewhere.org").await;

    assert_eq!(409, response.status().as_u16());
}

#[tokio::test]
async fn invalid_destinations_are_rejected() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());

    for destination in ["not-an-email", "", "a@"] {
        let response = create_alias(&app, "info@example.com", destination).await;
        assert_eq!(400, response.status().as_u16(), "accepted {:?}", destination);
    }

    let response = create_alias(&app, "info@example.com", "info@example.com").await;
    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn deleting_an_alias_removes_it() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(
        201,
        create_alias(&app, "info@example.com", "team@elsewhere.org")
            .await
            .status()
    );

    let response = app.delete("/aliases/info@example.com").await;

    assert_eq!(204, response.status().as_u16());
    assert!(alias_destination(&app, "info@example.com").await.is_none());

    let response = app.delete("/aliases/info@example.com").await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn alias_lists_can_be_filtered_by_domain() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("one.example.com", "mail").await.status());
    assert_eq!(201, app.create_domain("two.example.com", "mail").await.status());
    assert_eq!(
        201,
        create_alias(&app, "info@one.example.com", "a@elsewhere.org")
            .await
            .status()
    );
    assert_eq!(
        201,
        create_alias(&app, "info@two.example.com", "b@elsewhere.org")
            .await
            .status()
    );

    let all: serde_json::Value = app.get("/aliases").await.json().await.unwrap();
    assert_eq!(2, all["aliases"].as_array().unwrap().len());

    let filtered: serde_json::Value = app
        .get("/aliases?domain=one.example.com")
        .await
        .json()
        .await
        .unwrap();
    let aliases = filtered["aliases"].as_array().unwrap();
    assert_eq!(1, aliases.len());
    assert_eq!(aliases[0]["source"], "info@one.example.com");
}
