mod support;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;

use support::{
    build_router, build_router_with_store, cookie_request, get_request, json_request, register,
    send,
};

#[tokio::test]
async fn register_login_create_room_and_send_message() {
    let app = build_router();
    register(&app, "User A", "a@x.com").await;

    let login = send(
        &app,
        json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": "a@x.com", "password": "Passw0rd1" }),
        ),
    )
    .await;
    assert_eq!(login.status, StatusCode::OK);
    assert!(login.body.get("refresh_token").is_none());
    let cookie = login.set_cookie("refresh_token").expect("refresh cookie");
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=604800"));
    let token = login.body["token"].as_str().unwrap().to_owned();

    let room = send(
        &app,
        json_request(
            "POST",
            "/api/chatrooms",
            Some(&token),
            json!({ "name": "Team", "is_group_chat": true, "member_ids": [] }),
        ),
    )
    .await;
    assert_eq!(room.status, StatusCode::CREATED, "{}", room.body);
    assert_eq!(room.body["members"].as_array().unwrap().len(), 1);
    let room_id = room.body["id"].as_str().unwrap().to_owned();

    let sent = send(
        &app,
        json_request(
            "POST",
            &format!("/api/chatrooms/{room_id}/messages"),
            Some(&token),
            json!({ "content": "hi" }),
        ),
    )
    .await;
    assert_eq!(sent.status, StatusCode::CREATED, "{}", sent.body);

    let history = send(
        &app,
        get_request(
            &format!("/api/chatrooms/{room_id}/messages?page_size=10"),
            &token,
        ),
    )
    .await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(history.body["messages"][0]["id"], sent.body["id"]);
    assert_eq!(history.body["messages"][0]["sender"]["name"], "User A");
}

#[tokio::test]
async fn protected_routes_require_a_valid_bearer_token() {
    let app = build_router();

    let missing = send(
        &app,
        Request::builder()
            .uri("/api/profile")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.body["code"], "INVALID_TOKEN");

    let forged = send(&app, get_request("/api/profile", "not.a.jwt")).await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    assert_eq!(forged.body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn refresh_rotates_cookie_and_rejects_replay() {
    let app = build_router();
    let (_, _, cookie) = register(&app, "User A", "a@x.com").await;

    let rotated = send(&app, cookie_request("/auth/refresh", Some(&cookie))).await;
    assert_eq!(rotated.status, StatusCode::OK);
    assert!(rotated.body["token"].is_string());
    let new_cookie = rotated.cookie_pair("refresh_token").expect("rotated cookie");
    assert_ne!(new_cookie, cookie);

    let replay = send(&app, cookie_request("/auth/refresh", Some(&cookie))).await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    let cleared = replay.set_cookie("refresh_token").expect("cleared cookie");
    assert!(cleared.contains("Max-Age=0"));

    let no_cookie = send(&app, cookie_request("/auth/refresh", None)).await;
    assert_eq!(no_cookie.status, StatusCode::UNAUTHORIZED);

    let logout = send(&app, cookie_request("/auth/logout", Some(&new_cookie))).await;
    assert_eq!(logout.status, StatusCode::OK);
    assert!(logout
        .set_cookie("refresh_token")
        .expect("cleared cookie")
        .contains("Max-Age=0"));

    let after_logout = send(&app, cookie_request("/auth/refresh", Some(&new_cookie))).await;
    assert_eq!(after_logout.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_members_are_forbidden_and_missing_rooms_are_not_found() {
    let app = build_router();
    let (alice, _, _) = register(&app, "Alice", "alice@x.com").await;
    let (bob, _, _) = register(&app, "Bob", "bob@x.com").await;

    let room = send(
        &app,
        json_request("POST", "/api/chatrooms", Some(&alice), json!({ "name": "Private" })),
    )
    .await;
    let room_id = room.body["id"].as_str().unwrap().to_owned();

    let forbidden = send(
        &app,
        json_request(
            "POST",
            &format!("/api/chatrooms/{room_id}/messages"),
            Some(&bob),
            json!({ "content": "let me in" }),
        ),
    )
    .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
    assert_eq!(forbidden.body["code"], "NOT_ROOM_MEMBER");

    let missing = send(
        &app,
        get_request(
            "/api/chatrooms/00000000-0000-0000-0000-000000000000",
            &alice,
        ),
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_registration_and_bad_input_are_rejected() {
    let app = build_router();
    register(&app, "Alice", "alice@x.com").await;

    let duplicate = send(
        &app,
        json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "name": "Alice Two", "email": "ALICE@x.com", "password": "Passw0rd1" }),
        ),
    )
    .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let short_password = send(
        &app,
        json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "name": "Carol", "email": "carol@x.com", "password": "short" }),
        ),
    )
    .await;
    assert_eq!(short_password.status, StatusCode::BAD_REQUEST);
    assert_eq!(short_password.body["code"], "VALIDATION_FAILED");

    let wrong_password = send(
        &app,
        json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": "alice@x.com", "password": "Wrong0rd1" }),
        ),
    )
    .await;
    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body["code"], "INVALID_CREDENTIALS");

    // 40 个字符但 80 个字节
    let multibyte_password = send(
        &app,
        json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "name": "Dave", "email": "dave@x.com", "password": "é".repeat(40) }),
        ),
    )
    .await;
    assert_eq!(multibyte_password.status, StatusCode::BAD_REQUEST);
    assert_eq!(multibyte_password.body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn login_with_a_longer_password_sharing_the_prefix_fails() {
    let app = build_router();
    let password = "p".repeat(72);
    let registered = send(
        &app,
        json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "name": "Erin", "email": "erin@x.com", "password": password }),
        ),
    )
    .await;
    assert_eq!(registered.status, StatusCode::CREATED, "{}", registered.body);

    let extended = send(
        &app,
        json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": "erin@x.com", "password": format!("{password}-and-more") }),
        ),
    )
    .await;
    assert_eq!(extended.status, StatusCode::UNAUTHORIZED);
    assert_eq!(extended.body["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn malformed_requests_get_the_error_body() {
    let app = build_router();
    let (token, _, _) = register(&app, "Alice", "alice@x.com").await;
    let room = send(
        &app,
        json_request("POST", "/api/chatrooms", Some(&token), json!({ "name": "Team" })),
    )
    .await;
    let room_id = room.body["id"].as_str().unwrap().to_owned();

    let cursor = send(
        &app,
        get_request(
            &format!("/api/chatrooms/{room_id}/messages?before=yesterday"),
            &token,
        ),
    )
    .await;
    assert_eq!(cursor.status, StatusCode::BAD_REQUEST);
    assert_eq!(cursor.body["code"], "BAD_REQUEST");

    let bad_id = send(&app, get_request("/api/chatrooms/not-a-uuid", &token)).await;
    assert_eq!(bad_id.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_id.body["code"], "BAD_REQUEST");
    assert!(bad_id.body["message"].is_string());

    let bad_page_size = send(
        &app,
        get_request(
            &format!("/api/chatrooms/{room_id}/messages?page_size=many"),
            &token,
        ),
    )
    .await;
    assert_eq!(bad_page_size.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_page_size.body["code"], "BAD_REQUEST");

    let bad_json = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/api/chatrooms/{room_id}/messages"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"content\": "))
            .unwrap(),
    )
    .await;
    assert_eq!(bad_json.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_json.body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn history_pages_follow_next_before_without_gaps() {
    let app = build_router();
    let (token, _, _) = register(&app, "Alice", "alice@x.com").await;
    let room = send(
        &app,
        json_request("POST", "/api/chatrooms", Some(&token), json!({ "name": "Team" })),
    )
    .await;
    let room_id = room.body["id"].as_str().unwrap().to_owned();

    let mut sent = Vec::new();
    for i in 0..5 {
        let message = send(
            &app,
            json_request(
                "POST",
                &format!("/api/chatrooms/{room_id}/messages"),
                Some(&token),
                json!({ "content": format!("m{i}") }),
            ),
        )
        .await;
        sent.push(message.body["id"].as_str().unwrap().to_owned());
    }

    let mut seen = Vec::new();
    let mut uri = format!("/api/chatrooms/{room_id}/messages?page_size=2");
    loop {
        let page = send(&app, get_request(&uri, &token)).await;
        assert_eq!(page.status, StatusCode::OK, "{}", page.body);
        for message in page.body["messages"].as_array().unwrap() {
            seen.push(message["id"].as_str().unwrap().to_owned());
        }
        match page.body["next_before"].as_str() {
            Some(cursor) => {
                uri = format!("/api/chatrooms/{room_id}/messages?page_size=2&before={cursor}")
            }
            None => break,
        }
    }

    seen.sort();
    sent.sort();
    assert_eq!(seen, sent);
}

#[tokio::test]
async fn logout_clears_the_cookie_even_when_revocation_fails() {
    let (app, store) = build_router_with_store();
    let (_, _, cookie) = register(&app, "Alice", "alice@x.com").await;

    store.set_unavailable(true).await;
    let logout = send(&app, cookie_request("/auth/logout", Some(&cookie))).await;
    assert_eq!(logout.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(logout.body["code"], "INTERNAL_ERROR");
    assert!(logout
        .set_cookie("refresh_token")
        .expect("cleared cookie")
        .contains("Max-Age=0"));
}

#[tokio::test]
async fn profile_update_and_avatar_upload() {
    let app = build_router();
    let (token, _, _) = register(&app, "Alice", "alice@x.com").await;

    let updated = send(
        &app,
        json_request("PUT", "/api/profile", Some(&token), json!({ "bio": "hello" })),
    )
    .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["bio"], "hello");
    assert_eq!(updated.body["name"], "Alice");

    let png = b"\x89PNG\r\n\x1a\n0000".to_vec();
    let uploaded = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/avatar/upload")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(png))
            .unwrap(),
    )
    .await;
    assert_eq!(uploaded.status, StatusCode::OK, "{}", uploaded.body);
    assert_eq!(
        uploaded.body["profile_image_url"],
        "https://cdn.test/avatars/12.png"
    );

    let not_an_image = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/avatar/upload")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from("plain text"))
            .unwrap(),
    )
    .await;
    assert_eq!(not_an_image.status, StatusCode::BAD_REQUEST);
}
