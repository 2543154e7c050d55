use crate::helpers::spawn_app;

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .get(format!("{}/health_check", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    assert_eq!(Some(0), response.content_length());
}

#[tokio::test]
async fn requests_without_api_key_are_rejected() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .get(format!("{}/domains", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn requests_with_unknown_api_key_are_rejected() {
    let app = spawn_app().await;

    let response = reqwest::Client::new()
        .post(format!("{}/domains", app.address))
        .header("X-Api-Key", "not-a-real-key")
        .json(&serde_json::json!({ "name": "example.com" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn database_backed_api_keys_are_accepted() {
    let app = spawn_app().await;
    let key = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO api_keys (id, key, description, created_at) VALUES ($1, $2, $3, now())",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(&key)
    .bind("ci test key")
    .execute(&app.db_pool)
    .await
    .expect("Failed to insert API key.");

    let response = reqwest::Client::new()
        .get(format!("{}/domains", app.address))
        .header("X-Api-Key", &key)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());

    let last_used: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT last_used_at FROM api_keys WHERE key = $1")
            .bind(&key)
            .fetch_one(&app.db_pool)
            .await
            .expect("Failed to fetch API key.");
    assert!(last_used.is_some());
}
