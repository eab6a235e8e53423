//! Router-level tests for the session lifecycle: login throttling,
//! revocation, refresh, password flows and account deletion.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use serde_json::json;
use storefront_core::audit::actions;
use storefront_core::auth::password::Argon2Params;
use storefront_core::kv::KvStore;
use storefront_core::store::UserStore;

use common::{CapturingMailer, Harness, access_token, delete, get, post, refresh_token, test_config};

#[tokio::test(start_paused = true)]
async fn repeated_bad_logins_engage_a_cooldown_that_expires() {
    let h = Harness::new();
    h.register("alice@x.io", "correct-horse").await;

    for _ in 0..5 {
        let reply = h.login("alice@x.io", "wrong-password").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.error(), "Email ou mot de passe incorrect");
    }

    let blocked = h.login("alice@x.io", "correct-horse").await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(blocked.headers[RETRY_AFTER], "900");
    assert_eq!(blocked.body["retry_after"], 900);
    assert!(blocked.error().contains("15 minutes"), "{}", blocked.body);

    // Other addresses are not affected.
    h.register("eve@x.io", "correct-horse").await;
    assert_eq!(h.login("eve@x.io", "correct-horse").await.status, StatusCode::OK);

    tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;

    let reply = h.login("Alice@X.io", "correct-horse").await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert!(reply.body["access_token"].is_string());
    assert!(reply.body["refresh_token"].is_string());
    assert_eq!(reply.body["token_type"], "Bearer");
}

#[tokio::test]
async fn successful_login_clears_attempt_counters() {
    let h = Harness::new();
    h.register("alice@x.io", "correct-horse").await;
    for _ in 0..3 {
        h.login("alice@x.io", "nope-nope").await;
    }
    assert!(h.kv.exists("login_attempts:alice@x.io").await.unwrap());

    assert_eq!(h.login("alice@x.io", "correct-horse").await.status, StatusCode::OK);
    assert!(!h.kv.exists("login_attempts:alice@x.io").await.unwrap());
    assert!(!h.kv.exists("login_cooldown:alice@x.io").await.unwrap());
}

#[tokio::test]
async fn validation_errors_do_not_count_as_failed_logins() {
    let h = Harness::new();
    let reply = h
        .send(post("/api/auth/login").json(json!({ "email": "alice@x.io" })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.error().contains("password"), "{}", reply.body);
    assert!(!h.kv.exists("login_attempts:alice@x.io").await.unwrap());
}

#[tokio::test]
async fn malformed_bodies_get_the_error_envelope() {
    let h = Harness::new();
    let reply = h
        .send(post("/api/auth/register").raw_json("{\"email\": \"alice@x.io\","))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(!reply.error().is_empty(), "{}", reply.body);

    let reply = h
        .send(post("/api/auth/forgot-password").json(json!({ "email": 42 })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(!reply.error().is_empty(), "{}", reply.body);
}

#[tokio::test]
async fn unknown_email_and_bad_password_look_the_same() {
    let h = Harness::new();
    h.register("alice@x.io", "correct-horse").await;

    let unknown = h.login("nobody@x.io", "correct-horse").await;
    let wrong = h.login("alice@x.io", "battery-staple").await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.body, wrong.body);

    let failed = h.audited(actions::LOGIN_FAILED).await;
    assert!(!failed.success);
}

#[tokio::test]
async fn unknown_email_costs_a_full_verification() {
    let mut config = test_config();
    config.argon2 = Argon2Params {
        memory_kib: 2048,
        iterations: 2,
        parallelism: 1,
    };
    let h = Harness::with_config(config);
    h.register("alice@x.io", "correct-horse").await;

    async fn fastest(h: &Harness, email: &str) -> Duration {
        let mut best = Duration::MAX;
        for _ in 0..3 {
            let started = Instant::now();
            let reply = h.login(email, "battery-staple").await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
            best = best.min(started.elapsed());
        }
        best
    }

    let known = fastest(&h, "alice@x.io").await;
    let unknown = fastest(&h, "nobody@x.io").await;
    assert!(
        unknown * 4 >= known,
        "unknown email answered in {unknown:?}, known in {known:?}"
    );
}

#[tokio::test]
async fn registration_validates_and_rejects_duplicates() {
    let h = Harness::new();
    let short = h
        .send(post("/api/auth/register").json(json!({ "email": "a@x.io", "password": "short" })))
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);

    let bad_email = h
        .send(post("/api/auth/register").json(json!({ "email": "not-an-email", "password": "long-enough" })))
        .await;
    assert_eq!(bad_email.status, StatusCode::BAD_REQUEST);

    let created = h.register("Alice@X.io", "long-enough").await;
    assert_eq!(created.body["user"]["email"], "alice@x.io");
    assert_eq!(created.body["user"]["role"], "user");

    let dup = h
        .send(post("/api/auth/register").json(json!({ "email": "alice@x.io", "password": "long-enough" })))
        .await;
    assert_eq!(dup.status, StatusCode::CONFLICT);

    let event = h.audited(actions::USER_CREATE).await;
    assert_eq!(event.resource_id.as_deref(), created.body["user"]["id"].as_str());
}

#[tokio::test]
async fn missing_or_garbled_tokens_are_rejected() {
    let h = Harness::new();
    let missing = h.send(get("/api/auth/me")).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.error(), "Token manquant");

    let garbled = h.send(get("/api/auth/me").bearer("not.a.jwt")).await;
    assert_eq!(garbled.status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbled.error(), "Token invalide");
}

#[tokio::test]
async fn logout_revokes_the_access_token() {
    let h = Harness::new();
    h.register("bob@x.io", "bob-password").await;
    let login = h.login("bob@x.io", "bob-password").await;
    let access = access_token(&login);
    let user_id = login.body["user"]["id"].as_str().unwrap().to_string();

    let me = h.send(get("/api/auth/me").bearer(&access)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], "bob@x.io");

    let out = h.send(post("/api/auth/logout").bearer(&access)).await;
    assert_eq!(out.status, StatusCode::OK, "{}", out.body);

    let me = h.send(get("/api/auth/me").bearer(&access)).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert_eq!(me.body, json!({ "error": "Token révoqué" }));

    assert!(h.state.sessions.get(&user_id, None).await.unwrap().is_none());
    let rejected = h.audited(actions::TOKEN_REJECTED).await;
    assert_eq!(rejected.user_id.as_deref(), Some(user_id.as_str()));
}

#[tokio::test]
async fn logout_all_kills_refresh_on_every_device() {
    let h = Harness::new();
    h.register("bob@x.io", "bob-password").await;
    let one = h.login_on("device-1", "bob@x.io", "bob-password").await;
    let two = h.login_on("device-2", "bob@x.io", "bob-password").await;
    let user_id = one.body["user"]["id"].as_str().unwrap().to_string();

    let sessions = h
        .send(get("/api/auth/sessions").bearer(&access_token(&one)))
        .await;
    assert_eq!(sessions.body["count"], 2);

    let out = h
        .send(
            post("/api/auth/logout")
                .device("device-1")
                .bearer(&access_token(&one))
                .json(json!({ "logout_all": true })),
        )
        .await;
    assert_eq!(out.status, StatusCode::OK, "{}", out.body);

    let refresh = h
        .send(
            post("/api/auth/refresh")
                .device("device-2")
                .bearer(&access_token(&two))
                .json(json!({ "refresh_token": refresh_token(&two) })),
        )
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);

    for device in ["device-1", "device-2"] {
        assert!(h.state.sessions.get(&user_id, Some(device)).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn single_device_logout_leaves_other_devices_alone() {
    let h = Harness::new();
    h.register("bob@x.io", "bob-password").await;
    let one = h.login_on("device-1", "bob@x.io", "bob-password").await;
    let two = h.login_on("device-2", "bob@x.io", "bob-password").await;

    h.send(post("/api/auth/logout").device("device-1").bearer(&access_token(&one)))
        .await;

    let refresh = h
        .send(
            post("/api/auth/refresh")
                .device("device-2")
                .bearer(&access_token(&two))
                .json(json!({ "refresh_token": refresh_token(&two) })),
        )
        .await;
    assert_eq!(refresh.status, StatusCode::OK, "{}", refresh.body);
    // Not rotating by default.
    assert!(refresh.body.get("refresh_token").is_none());

    let fresh = refresh.body["access_token"].as_str().unwrap();
    assert_eq!(h.send(get("/api/auth/me").bearer(fresh)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_requires_the_matching_token_for_the_device() {
    let h = Harness::new();
    h.register("bob@x.io", "bob-password").await;
    let one = h.login_on("device-1", "bob@x.io", "bob-password").await;

    let wrong_device = h
        .send(
            post("/api/auth/refresh")
                .device("device-2")
                .bearer(&access_token(&one))
                .json(json!({ "refresh_token": refresh_token(&one) })),
        )
        .await;
    assert_eq!(wrong_device.status, StatusCode::UNAUTHORIZED);

    let wrong_token = h
        .send(
            post("/api/auth/refresh")
                .device("device-1")
                .bearer(&access_token(&one))
                .json(json!({ "refresh_token": "forged" })),
        )
        .await;
    assert_eq!(wrong_token.status, StatusCode::UNAUTHORIZED);

    let no_access = h
        .send(post("/api/auth/refresh").device("device-1").json(json!({ "refresh_token": refresh_token(&one) })))
        .await;
    assert_eq!(no_access.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rotation_replaces_the_refresh_token() {
    let mut config = test_config();
    config.rotate_refresh_tokens = true;
    let h = Harness::with_config(config);
    h.register("bob@x.io", "bob-password").await;
    let login = h.login("bob@x.io", "bob-password").await;
    let first = refresh_token(&login);

    let refreshed = h
        .send(
            post("/api/auth/refresh")
                .bearer(&access_token(&login))
                .json(json!({ "refresh_token": first })),
        )
        .await;
    assert_eq!(refreshed.status, StatusCode::OK);
    let second = refreshed.body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(second, first);

    let replay = h
        .send(
            post("/api/auth/refresh")
                .bearer(&access_token(&login))
                .json(json!({ "refresh_token": first })),
        )
        .await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn legacy_bcrypt_hash_is_upgraded_on_login() {
    let h = Harness::new();
    let legacy = bcrypt::hash("hunter2", 4).unwrap();
    let mut new = storefront_core::models::auth::NewPrincipal::local("old@x.io", None, legacy);
    new.name = Some("Old Timer".into());
    let principal = h.users.create_principal(new).await.unwrap();

    let reply = h.login("old@x.io", "hunter2").await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);

    let stored = h
        .users
        .find_by_id(&principal.id)
        .await
        .unwrap()
        .unwrap()
        .password_hash
        .unwrap();
    assert!(stored.starts_with("$argon2id$"), "{stored}");
    let verification = h.state.hasher.verify("hunter2", &stored).unwrap();
    assert!(verification.matched);
    assert!(!verification.needs_rehash);

    assert_eq!(h.login("old@x.io", "hunter2").await.status, StatusCode::OK);
}

#[tokio::test]
async fn change_password_ends_every_session() {
    let h = Harness::new();
    h.register("bob@x.io", "bob-password").await;
    let one = h.login_on("device-1", "bob@x.io", "bob-password").await;
    let two = h.login_on("device-2", "bob@x.io", "bob-password").await;

    let wrong = h
        .send(
            post("/api/auth/change-password")
                .bearer(&access_token(&one))
                .json(json!({ "old": "not-it-at-all", "new": "brand-new-pass" })),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let changed = h
        .send(
            post("/api/auth/change-password")
                .bearer(&access_token(&one))
                .json(json!({ "old_password": "bob-password", "new_password": "brand-new-pass" })),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK, "{}", changed.body);

    assert_eq!(
        h.send(get("/api/auth/me").bearer(&access_token(&one))).await.status,
        StatusCode::UNAUTHORIZED
    );
    let refresh = h
        .send(
            post("/api/auth/refresh")
                .device("device-2")
                .bearer(&access_token(&two))
                .json(json!({ "refresh_token": refresh_token(&two) })),
        )
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);

    assert_eq!(h.login("bob@x.io", "bob-password").await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.login("bob@x.io", "brand-new-pass").await.status, StatusCode::OK);
}

#[tokio::test]
async fn password_reset_round_trip() {
    let mailer = CapturingMailer::default();
    let h = Harness::new();
    let state = h.state.clone().with_mailer(Arc::new(mailer.clone()));
    let h = Harness::from_state(state, h.users, h.audit, h.kv);
    h.register("bob@x.io", "bob-password").await;
    let login = h.login("bob@x.io", "bob-password").await;

    let unknown = h
        .send(post("/api/auth/forgot-password").json(json!({ "email": "ghost@x.io" })))
        .await;
    let known = h
        .send(post("/api/auth/forgot-password").json(json!({ "email": "BOB@x.io" })))
        .await;
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(unknown.body, known.body);

    let link = mailer.wait_for_link().await;
    assert!(link.starts_with("http://localhost:3000/reset-password?token="));
    let token = link.split("token=").nth(1).unwrap().to_string();
    assert_eq!(mailer.sent.lock().unwrap().len(), 1);

    let reset = h
        .send(post("/api/auth/reset-password").json(json!({ "token": token, "new_password": "reset-password-1" })))
        .await;
    assert_eq!(reset.status, StatusCode::OK, "{}", reset.body);

    let reused = h
        .send(post("/api/auth/reset-password").json(json!({ "token": token, "new": "reset-password-2" })))
        .await;
    assert_eq!(reused.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reused.error(), "Token invalide ou expiré");

    let refresh = h
        .send(
            post("/api/auth/refresh")
                .bearer(&access_token(&login))
                .json(json!({ "refresh_token": refresh_token(&login) })),
        )
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.login("bob@x.io", "reset-password-1").await.status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_an_account_revokes_and_purges() {
    let h = Harness::new();
    h.register("bob@x.io", "bob-password").await;
    let login = h.login("bob@x.io", "bob-password").await;
    let access = access_token(&login);
    let user_id = login.body["user"]["id"].as_str().unwrap().to_string();
    h.kv.set(&format!("cart:{user_id}"), "[]", None).await.unwrap();

    let no_password = h
        .send(delete("/api/auth/delete-account").bearer(&access).json(json!({})))
        .await;
    assert_eq!(no_password.status, StatusCode::BAD_REQUEST);

    let wrong = h
        .send(delete("/api/auth/delete-account").bearer(&access).json(json!({ "password": "guess-again" })))
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let deleted = h
        .send(delete("/api/auth/delete-account").bearer(&access).json(json!({ "password": "bob-password" })))
        .await;
    assert_eq!(deleted.status, StatusCode::OK, "{}", deleted.body);

    assert_eq!(h.send(get("/api/auth/me").bearer(&access)).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.login("bob@x.io", "bob-password").await.status, StatusCode::UNAUTHORIZED);

    for _ in 0..200 {
        if h.users.find_by_id(&user_id).await.unwrap().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.users.find_by_id(&user_id).await.unwrap().is_none());
    assert!(!h.kv.exists(&format!("cart:{user_id}")).await.unwrap());
    assert_eq!(h.audited(actions::USER_DELETE).await.resource_id.as_deref(), Some(user_id.as_str()));
}
