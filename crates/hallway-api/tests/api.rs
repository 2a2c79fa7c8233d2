use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use hallway_api::auth::{AppState, AppStateInner};
use hallway_api::gifs::{DEFAULT_TENOR_URL, GifClient};
use hallway_api::profanity::ProfanityFilter;
use hallway_api::storage::ObjectStore;
use hallway_db::Database;
use hallway_gateway::dispatcher::Dispatcher;
use hallway_types::events::GatewayEvent;
use hallway_types::models::ContactPair;

struct TestApp {
    app: Router,
    state: AppState,
    _storage: TempDir,
}

struct TestUser {
    id: Uuid,
    token: String,
}

async fn test_app() -> TestApp {
    let storage_dir = tempfile::tempdir().unwrap();
    let state: AppState = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "test-secret".into(),
        dispatcher: Dispatcher::new(),
        storage: ObjectStore::new(storage_dir.path().to_path_buf()).await.unwrap(),
        gifs: GifClient::new(None, DEFAULT_TENOR_URL),
        profanity: ProfanityFilter::default(),
    });

    TestApp {
        app: hallway_api::router(state.clone()),
        state,
        _storage: storage_dir,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        self.send(req).await
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = self.send_raw(req).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn send_raw(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn register(&self, name: &str) -> TestUser {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "name": name,
                    "email": format!("{}@school.test", name.to_lowercase()),
                    "password": "correct horse battery",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        TestUser {
            id: body["user_id"].as_str().unwrap().parse().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    async fn send_text(&self, from: &TestUser, to: &TestUser, content: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/messages",
            Some(&from.token),
            Some(json!({ "recipient_id": to.id, "content": content })),
        )
        .await
    }

    async fn request_dm(&self, from: &TestUser, to: &TestUser) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/dm-requests",
            Some(&from.token),
            Some(json!({ "recipient_id": to.id })),
        )
        .await
    }

    async fn respond(&self, as_user: &TestUser, request_id: &str, accept: bool) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            &format!("/dm-requests/{}/respond", request_id),
            Some(&as_user.token),
            Some(json!({ "accept": accept })),
        )
        .await
    }

    async fn set_prefs(&self, user: &TestUser, prefs: Value) {
        let (status, body) = self.call(Method::PATCH, "/users/me", Some(&user.token), Some(prefs)).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
}

#[tokio::test]
async fn register_login_and_auth_required() {
    let t = test_app().await;
    let ana = t.register("Ana").await;

    let (status, _) = t
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "name": "Ana 2", "email": "ANA@school.test", "password": "another password" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = t
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ana@school.test", "password": "correct horse battery" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], json!(ana.id));

    let (status, body) = t
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "ana@school.test", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = t.call(Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, me) = t.call(Method::GET, "/users/me", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["privacy_mode"], false);
    assert_eq!(me["profanity_filter_enabled"], false);
}

#[tokio::test]
async fn privacy_mode_requires_an_accepted_request() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;
    t.set_prefs(&ben, json!({ "privacy_mode": true })).await;

    let (status, body) = t.send_text(&ana, &ben, "hi ben").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, request) = t.request_dm(&ana, &ben).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    let request_id = request["id"].as_str().unwrap().to_string();

    // Still pending: nothing gets through.
    let (status, _) = t.send_text(&ana, &ben, "hi ben").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.respond(&ben, &request_id, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["counterpart"]["id"], json!(ana.id));

    let (status, message) = t.send_text(&ana, &ben, "hi ben").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["content"], "hi ben");

    // Either side of the pair may now write.
    let (status, _) = t.send_text(&ben, &ana, "hey ana").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, history) = t
        .call(Method::GET, &format!("/conversations/{}/messages", ben.id), Some(&ana.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["content"], "hi ben");
    assert_eq!(history[1]["content"], "hey ana");
}

#[tokio::test]
async fn rejected_request_keeps_the_gate_closed() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;
    t.set_prefs(&ben, json!({ "privacy_mode": true })).await;

    let (_, request) = t.request_dm(&ana, &ben).await;
    let request_id = request["id"].as_str().unwrap().to_string();

    let (status, body) = t.respond(&ben, &request_id, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");

    let (status, _) = t.send_text(&ana, &ben, "please?").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.request_dm(&ana, &ben).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = t.respond(&ben, &request_id, true).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn only_the_recipient_may_respond_and_accept_is_idempotent() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;
    let cal = t.register("Cal").await;

    let (_, request) = t.request_dm(&ana, &ben).await;
    let request_id = request["id"].as_str().unwrap().to_string();

    let (status, _) = t.respond(&ana, &request_id, true).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.respond(&cal, &request_id, true).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.respond(&ben, &request_id, true).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = t.respond(&ben, &request_id, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (_, contacts) = t.call(Method::GET, "/contacts", Some(&ana.token), None).await;
    let contacts = contacts.as_array().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["id"], json!(ben.id));

    let (status, _) = t.request_dm(&ana, &ben).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = t.respond(&ben, &Uuid::new_v4().to_string(), true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profanity_is_masked_per_recipient() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;
    t.set_prefs(&ben, json!({ "profanity_filter_enabled": true })).await;

    let (status, to_ben) = t.send_text(&ana, &ben, "this quiz is shit").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(to_ben["content"], "this quiz is ****");

    // Ana has the filter off, so Ben's words reach her unchanged.
    let (status, to_ana) = t.send_text(&ben, &ana, "this quiz is shit").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(to_ana["content"], "this quiz is shit");

    let message_id = to_ben["id"].as_str().unwrap();
    let (status, edited) = t
        .call(
            Method::PATCH,
            &format!("/messages/{}", message_id),
            Some(&ana.token),
            Some(json!({ "content": "damn, fine" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["content"], "****, fine");
    assert!(edited["edited_at"].is_string());
}

#[tokio::test]
async fn only_the_sender_edits_or_deletes() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;

    let (_, message) = t.send_text(&ana, &ben, "first").await;
    let uri = format!("/messages/{}", message["id"].as_str().unwrap());

    let (status, _) = t
        .call(Method::PATCH, &uri, Some(&ben.token), Some(json!({ "content": "mine now" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.call(Method::DELETE, &uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.call(Method::DELETE, &uri, Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.call(Method::DELETE, &uri, Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn realtime_events_reach_the_right_users() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;
    let cal = t.register("Cal").await;

    let (_, mut ana_rx) = t.state.dispatcher.register(ana.id).await;
    let (_, mut ben_rx) = t.state.dispatcher.register(ben.id).await;
    let (_, mut cal_rx) = t.state.dispatcher.register(cal.id).await;

    let (_, request) = t.request_dm(&ana, &ben).await;
    match ben_rx.try_recv() {
        Ok(GatewayEvent::DmRequestInsert { request: r }) => assert_eq!(r.sender_id, ana.id),
        other => panic!("expected DmRequestInsert, got {:?}", other),
    }
    assert!(ana_rx.try_recv().is_err());

    let request_id = request["id"].as_str().unwrap().to_string();
    t.respond(&ben, &request_id, true).await;
    match ana_rx.try_recv() {
        Ok(GatewayEvent::DmRequestUpdate { request: r }) => {
            assert_eq!(r.status, hallway_types::models::DmRequestStatus::Accepted)
        }
        other => panic!("expected DmRequestUpdate, got {:?}", other),
    }
    let _ = ben_rx.try_recv();

    t.send_text(&ana, &ben, "hello").await;
    assert!(matches!(ben_rx.try_recv(), Ok(GatewayEvent::MessageInsert { .. })));
    assert!(ana_rx.try_recv().is_err());
    assert!(cal_rx.try_recv().is_err());
}

#[tokio::test]
async fn notifications_feed_lists_pending_requests_and_answers() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;

    let (_, request) = t.request_dm(&ana, &ben).await;

    let (status, feed) = t.call(Method::GET, "/notifications", Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed["pending_count"], 1);
    assert_eq!(feed["items"][0]["type"], "dm_request_received");
    assert_eq!(feed["items"][0]["from"]["id"], json!(ana.id));

    t.respond(&ben, request["id"].as_str().unwrap(), true).await;
    t.send_text(&ben, &ana, "welcome").await;

    let (_, feed) = t.call(Method::GET, "/notifications", Some(&ana.token), None).await;
    assert_eq!(feed["pending_count"], 0);
    let kinds: Vec<&str> = feed["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"dm_request_answered"));
    assert!(kinds.contains(&"message_received"));

    let (_, feed) = t.call(Method::GET, "/notifications", Some(&ben.token), None).await;
    assert_eq!(feed["pending_count"], 0);
}

#[tokio::test]
async fn discovery_hides_privacy_mode_users() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;
    t.set_prefs(&ben, json!({ "privacy_mode": true })).await;

    let (status, users) = t.call(Method::GET, "/users", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(users.as_array().unwrap().iter().all(|u| u["id"] != json!(ben.id)));

    let (status, found) = t
        .call(Method::GET, "/users/lookup?email=ben@school.test", Some(&ana.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], json!(ben.id));
}

#[tokio::test]
async fn storage_writes_are_scoped_and_reads_are_public() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;

    let put = |uri: String, token: &str, bytes: &'static [u8]| {
        Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(bytes))
            .unwrap()
    };

    let own = format!("/storage/avatars/{}/me.png", ana.id);
    let (status, body) = t.send(put(own.clone(), &ana.token, b"\x89PNG fake")).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["public_url"], own);
    assert_eq!(body["size"], 9);

    let (status, _) = t
        .send(put(format!("/storage/avatars/{}/me.png", ben.id), &ana.token, b"x"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send(put(format!("/storage/avatars/{}/me.exe", ana.id), &ana.token, b"x"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, bytes) = t
        .send_raw(Request::builder().uri(&own).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"\x89PNG fake");

    let (status, _) = t.call(Method::DELETE, &own, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.call(Method::DELETE, &own, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = t.call(Method::DELETE, &own, Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t
        .send_raw(Request::builder().uri(&own).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gif_search_without_a_key_is_unavailable() {
    let t = test_app().await;
    let ana = t.register("Ana").await;

    let (status, body) = t.call(Method::GET, "/gifs/search?q=cats", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "unavailable");

    let (status, _) = t.call(Method::GET, "/gifs/search?q=", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn message_validation_and_media_messages() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;

    let (status, body) = t.send_text(&ana, &ana, "hi me").await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, body) = t
        .call(
            Method::POST,
            "/messages",
            Some(&ana.token),
            Some(json!({ "recipient_id": Uuid::new_v4(), "content": "anyone?" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

    let (status, _) = t
        .call(
            Method::POST,
            "/messages",
            Some(&ana.token),
            Some(json!({ "recipient_id": ben.id, "kind": "image" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let media_url = format!("/storage/chat-images/{}/p.png", ContactPair::new(ana.id, ben.id).key());
    let (status, body) = t
        .call(
            Method::POST,
            "/messages",
            Some(&ana.token),
            Some(json!({ "recipient_id": ben.id, "kind": "image", "media_url": media_url })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["kind"], "image");
    assert_eq!(body["content"], "");
    assert_eq!(body["media_url"], media_url);

    let (status, body) = t.request_dm(&ana, &ana).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn conversation_pages_backwards_by_message_id() {
    let t = test_app().await;
    let ana = t.register("Ana").await;
    let ben = t.register("Ben").await;

    for content in ["one", "two", "three"] {
        let (status, body) = t.send_text(&ana, &ben, content).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
    }

    let uri = format!("/conversations/{}/messages?limit=2", ana.id);
    let (status, page) = t.call(Method::GET, &uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = page.as_array().unwrap().iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["two", "three"]);

    let oldest = page[0]["id"].as_str().unwrap();
    let uri = format!("/conversations/{}/messages?limit=2&before={}", ana.id, oldest);
    let (status, older) = t.call(Method::GET, &uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = older.as_array().unwrap().iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["one"]);

    let uri = format!("/conversations/{}/messages?before=yesterday", ana.id);
    let (status, _) = t.call(Method::GET, &uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn storage_folders_are_not_objects() {
    let t = test_app().await;
    let ana = t.register("Ana").await;

    let put = |uri: String| {
        Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", ana.token))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(&b"\x89PNG fake"[..]))
            .unwrap()
    };

    let nested = format!("/storage/avatars/{}/nested.png/a.png", ana.id);
    let (status, body) = t.send(put(nested)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let folder = format!("/storage/avatars/{}/nested.png", ana.id);
    let (status, _) = t
        .send_raw(Request::builder().uri(&folder).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t.send(put(folder.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, _) = t.call(Method::DELETE, &folder, Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
