//! Integration tests for the login handshake: actor creation, renames,
//! name conflicts, bans, admin tokens, and protocol violations.

mod common;

use common::*;

#[tokio::test]
async fn fresh_login_mints_id_and_sends_field_state() {
    let server = start_test_server(300).await;
    let mut ws = connect(&server).await;

    let (actor_id, field_state) = login(&mut ws, "alice", None).await;

    assert!(!actor_id.is_empty());
    assert_eq!(field_state["size"], serde_json::json!([64, 64]));
    assert_eq!(field_state["cooldown"], 300);
    assert_eq!(field_state["data"]["pixels"], serde_json::json!([]));
    assert_eq!(field_state["data"]["selections"], serde_json::json!([]));
}

#[tokio::test]
async fn relogin_with_id_is_recognized() {
    let server = start_test_server(300).await;

    let actor_id = {
        let mut ws = connect(&server).await;
        let (id, _) = login(&mut ws, "alice", None).await;
        id
    };

    let mut ws = connect(&server).await;
    let (id, _) = login(&mut ws, "alice", Some(&actor_id)).await;
    assert_eq!(id, actor_id);
}

#[tokio::test]
async fn relogin_with_new_nickname_renames() {
    let server = start_test_server(300).await;

    let actor_id = {
        let mut ws = connect(&server).await;
        let (id, _) = login(&mut ws, "alice", None).await;
        id
    };

    let mut ws = connect(&server).await;
    login(&mut ws, "alicia", Some(&actor_id)).await;

    let conn = server.state.db.lock().unwrap();
    let user = pixelfield_server::store::identity::user_by_id(&conn, &actor_id)
        .unwrap()
        .unwrap();
    assert_eq!(user.nickname, "alicia");
}

#[tokio::test]
async fn unknown_actor_id_closes_with_not_found() {
    let server = start_test_server(300).await;
    let mut ws = connect(&server).await;

    send_json(
        &mut ws,
        serde_json::json!({ "type": "login", "data": { "nickname": "ghost", "user_id": "no-such-id" } }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4404));
}

#[tokio::test]
async fn duplicate_nickname_closes_with_name_conflict() {
    let server = start_test_server(300).await;

    let mut ws_a = connect(&server).await;
    login(&mut ws_a, "alice", None).await;

    let mut ws_b = connect(&server).await;
    send_json(
        &mut ws_b,
        serde_json::json!({ "type": "login", "data": { "nickname": "alice" } }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws_b).await, Some(4409));
}

#[tokio::test]
async fn rename_collision_closes_with_name_conflict() {
    let server = start_test_server(300).await;

    let alice_id = {
        let mut ws = connect(&server).await;
        let (id, _) = login(&mut ws, "alice", None).await;
        id
    };
    let mut ws_bob = connect(&server).await;
    login(&mut ws_bob, "bob", None).await;

    let mut ws = connect(&server).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "login", "data": { "nickname": "bob", "user_id": alice_id } }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4409));
}

#[tokio::test]
async fn banned_actor_closes_with_forbidden() {
    let server = start_test_server(300).await;

    let actor_id = {
        let mut ws = connect(&server).await;
        let (id, _) = login(&mut ws, "mallory", None).await;
        id
    };
    {
        let conn = server.state.db.lock().unwrap();
        pixelfield_server::store::identity::toggle_ban(&conn, &actor_id).unwrap();
    }

    let mut ws = connect(&server).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "login", "data": { "nickname": "mallory", "user_id": actor_id } }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4403));
}

#[tokio::test]
async fn first_message_must_be_a_login() {
    let server = start_test_server(300).await;
    let mut ws = connect(&server).await;

    send_json(
        &mut ws,
        serde_json::json!({ "type": "update_pixel", "data": { "x": 1, "y": 1, "color": "#FF0000" } }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4400));
}

#[tokio::test]
async fn malformed_first_frame_is_a_protocol_error() {
    let server = start_test_server(300).await;
    let mut ws = connect(&server).await;

    use futures_util::SinkExt;
    ws.send(tokio_tungstenite::tungstenite::Message::text("not json"))
        .await
        .unwrap();

    assert_eq!(recv_close_code(&mut ws).await, Some(4400));
}

#[tokio::test]
async fn empty_nickname_is_a_protocol_error() {
    let server = start_test_server(300).await;
    let mut ws = connect(&server).await;

    send_json(
        &mut ws,
        serde_json::json!({ "type": "login", "data": { "nickname": "" } }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4400));
}

#[tokio::test]
async fn admin_login_with_valid_token() {
    let server = start_test_server(300).await;
    let token = admin_token(&server, "root");

    let mut ws = connect(&server).await;
    let field_state = login_admin(&mut ws, &token).await;
    assert_eq!(field_state["size"], serde_json::json!([64, 64]));
}

#[tokio::test]
async fn admin_login_with_garbage_token_is_unauthorized() {
    let server = start_test_server(300).await;
    let mut ws = connect(&server).await;

    send_json(
        &mut ws,
        serde_json::json!({ "type": "login_admin", "data": "garbage-token" }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4401));
}

#[tokio::test]
async fn expired_admin_token_is_unauthorized() {
    let server = start_test_server(300).await;
    {
        let conn = server.state.db.lock().unwrap();
        pixelfield_server::store::identity::create_admin(&conn, "root", "hunter2").unwrap();
    }
    let token =
        pixelfield_server::auth::jwt::issue_admin_token(&server.state.jwt_secret, "root", -60)
            .unwrap();

    let mut ws = connect(&server).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "login_admin", "data": token }),
    )
    .await;

    assert_eq!(recv_close_code(&mut ws).await, Some(4401));
}

#[tokio::test]
async fn health_endpoint_responds() {
    let server = start_test_server(300).await;
    let body = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}
