use crate::helpers::{spawn_app, TestApp};

async fn password_hash(app: &TestApp, email: &str) -> Option<String> {
    sqlx::query_scalar("SELECT password_hash FROM mailboxes WHERE email = $1")
        .bind(email)
        .fetch_optional(&app.db_pool)
        .await
        .expect("Failed to query mailboxes.")
}

#[tokio::test]
async fn create_mailbox_provisions_storage_and_stores_a_hash() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());

    let response = app.create_mailbox("a@example.com").await;

    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["email"], "a@example.com");
    assert_eq!(body["quota_mb"], 1024);
    assert!(body.get("password_hash").is_none());

    let maildir = app.vmail_dir.join("example.com").join("a");
    for subdir in ["cur", "new", "tmp"] {
        assert!(maildir.join(subdir).is_dir(), "missing {}", subdir);
    }
    let hash = password_hash(&app, "a@example.com").await.unwrap();
    assert!(hash.starts_with("$mock$"));
    assert!(app
        .commands
        .calls()
        .iter()
        .any(|call| call.starts_with("change_owner") && call.ends_with("vmail:vmail")));
}

#[tokio::test]
async fn create_mailbox_for_an_unknown_domain_is_not_found() {
    let app = spawn_app().await;

    let response = app.create_mailbox("a@example.com").await;

    assert_eq!(404, response.status().as_u16());
    assert!(!app.vmail_dir.join("example.com").exists());
}

#[tokio::test]
async fn creating_the_same_mailbox_twice_is_a_conflict() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@example.com").await.status());

    let response = app.create_mailbox("a@example.com").await;

    assert_eq!(409, response.status().as_u16());
}

#[tokio::test]
async fn weak_passwords_are_rejected() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    let cases = vec![
        ("short1!A", "too short"),
        ("alllowercaseletters", "one character class"),
        ("lowercaseandlonger1", "two character classes"),
    ];

    for (password, reason) in cases {
        let response = app
            .post_json(
                "/mailboxes",
                &serde_json::json!({ "email": "a@example.com", "password": password }),
            )
            .await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "did not reject a password that is {}",
            reason
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["field"], "password");
    }
}

#[tokio::test]
async fn malformed_addresses_are_rejected() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    let cases = vec![
        "no-at-sign",
        "@example.com",
        "a@",
        "a b@example.com",
        ".dot@example.com",
        "slash/y@example.com",
    ];

    for email in cases {
        let response = app
            .post_json(
                "/mailboxes",
                &serde_json::json!({ "email": email, "password": "Str0ng-Passw0rd!" }),
            )
            .await;
        assert_eq!(400, response.status().as_u16(), "accepted {:?}", email);
    }
}

#[tokio::test]
async fn a_custom_quota_is_honored_and_a_nonpositive_one_rejected() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());

    let response = app
        .post_json(
            "/mailboxes",
            &serde_json::json!({
                "email": "a@example.com",
                "password": "Str0ng-Passw0rd!",
                "quota_mb": 2048,
            }),
        )
        .await;
    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["quota_mb"], 2048);

    let response = app
        .post_json(
            "/mailboxes",
            &serde_json::json!({
                "email": "b@example.com",
                "password": "Str0ng-Passw0rd!",
                "quota_mb": 0,
            }),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn quota_reports_realized_usage() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@example.com").await.status());

    let cur = app.vmail_dir.join("example.com").join("a").join("cur");
    std::fs::write(cur.join("msg1"), vec![0u8; 3 * 1024 * 1024])
        .expect("Failed to write test message.");

    let response = app.get("/mailboxes/a@example.com/quota").await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["email"], "a@example.com");
    assert_eq!(body["used_mb"], 3);
    assert_eq!(body["limit_mb"], 1024);
    assert_eq!(body["available_mb"], 1021);
}

#[tokio::test]
async fn quota_for_an_unknown_mailbox_is_not_found() {
    let app = spawn_app().await;

    let response = app.get("/mailboxes/a@example.com/quota").await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn updating_a_password_replaces_the_stored_hash() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@example.com").await.status());
    let before = password_hash(&app, "a@example.com").await.unwrap();

    let response = app
        .put_json(
            "/mailboxes/a@example.com/password",
            &serde_json::json!({ "password": "An0ther-Passw0rd!" }),
        )
        .await;

    assert_eq!(204, response.status().as_u16());
    let after = password_hash(&app, "a@example.com").await.unwrap();
    assert_ne!(before, after);
}

#[tokio::test]
async fn deleting_a_mailbox_removes_row_and_storage() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@example.com").await.status());

    let response = app.delete("/mailboxes/a@example.com").await;

    assert_eq!(204, response.status().as_u16());
    assert!(password_hash(&app, "a@example.com").await.is_none());
    assert!(!app.vmail_dir.join("example.com").join("a").exists());

    let response = app.delete("/mailboxes/a@example.com").await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn mailbox_lists_can_be_filtered_by_domain() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("one.example.com", "mail").await.status());
    assert_eq!(201, app.create_domain("two.example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@one.example.com").await.status());
    assert_eq!(201, app.create_mailbox("b@two.example.com").await.status());

    let all: serde_json::Value = app.get("/mailboxes").await.json().await.unwrap();
    assert_eq!(2, all["mailboxes"].as_array().unwrap().len());

    let filtered: serde_json::Value = app
        .get("/mailboxes?domain=one.example.com")
        .await
        .json()
        .await
        .unwrap();
    let mailboxes = filtered["mailboxes"].as_array().unwrap();
    assert_eq!(1, mailboxes.len());
    assert_eq!(mailboxes[0]["email"], "a@one.example.com");
}

#[tokio::test]
async fn a_single_mailbox_can_be_fetched() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    assert_eq!(201, app.create_mailbox("a@example.com").await.status());

    let response = app.get("/mailboxes/a@example.com").await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["email"], "a@example.com");
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn a_failed_ownership_handoff_leaves_no_storage_behind() {
    let app = spawn_app().await;
    assert_eq!(201, app.create_domain("example.com", "mail").await.status());
    app.commands.fail_change_owner();

    let response = app.create_mailbox("a@example.com").await;

    assert_eq!(500, response.status().as_u16());
    // The subdirectories exist before the hand-off runs; the whole tree
    // must be reaped on failure.
    assert!(!app.vmail_dir.join("example.com").join("a").exists());
    assert!(password_hash(&app, "a@example.com").await.is_none());
}
