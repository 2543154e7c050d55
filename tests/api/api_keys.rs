use crate::helpers::spawn_app;

#[tokio::test]
async fn a_minted_key_authenticates_requests() {
    let app = spawn_app().await;

    let response = app
        .post_json("/api_keys", &serde_json::json!({ "description": "ci" }))
        .await;

    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    let key = body["key"].as_str().unwrap();
    assert_eq!(40, key.len());
    assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(body["description"], "ci");

    let response = reqwest::Client::new()
        .get(format!("{}/domains", app.address))
        .header("X-Api-Key", key)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn listings_never_expose_the_secret() {
    let app = spawn_app().await;
    let created: serde_json::Value = app
        .post_json("/api_keys", &serde_json::json!({ "description": "ci" }))
        .await
        .json()
        .await
        .unwrap();
    let secret = created["key"].as_str().unwrap().to_string();

    let response = app.get("/api_keys").await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    let keys = body["api_keys"].as_array().unwrap();
    assert_eq!(1, keys.len());
    assert_eq!(keys[0]["description"], "ci");
    assert!(keys[0].get("key").is_none());
    assert!(!serde_json::to_string(&body).unwrap().contains(&secret));
}

#[tokio::test]
async fn deleting_a_key_revokes_it() {
    let app = spawn_app().await;
    let created: serde_json::Value = app
        .post_json("/api_keys", &serde_json::json!({ "description": "ci" }))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();
    let key = created["key"].as_str().unwrap().to_string();

    let response = app.delete(&format!("/api_keys/{}", id)).await;
    assert_eq!(204, response.status().as_u16());

    let response = reqwest::Client::new()
        .get(format!("{}/domains", app.address))
        .header("X-Api-Key", &key)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, response.status().as_u16());

    let response = app.delete(&format!("/api_keys/{}", id)).await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn a_blank_description_is_rejected() {
    let app = spawn_app().await;

    let response = app
        .post_json("/api_keys", &serde_json::json!({ "description": "   " }))
        .await;

    assert_eq!(400, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["field"], "description");
}
