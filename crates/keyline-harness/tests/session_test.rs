//! Authentication end to end, in process, with paused time.
//!
//! Challenge and session windows are driven by tokio's virtual clock, so the
//! expiry cases run instantly and deterministically.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use keyline_client::{ClientError, Session};
use keyline_core::DEFAULT_CHALLENGE_LIFETIME;
use keyline_harness::{LocalWorld, identity, sim_config};
use keyline_proto::{ErrorCode, Request, RequestBody, Role};
use keyline_server::DriverConfig;

fn code(result: Result<impl std::fmt::Debug, ClientError>) -> ErrorCode {
    match result {
        Err(e) => e.code().unwrap_or_else(|| panic!("not a rejection: {e}")),
        Ok(value) => panic!("expected rejection, got {value:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn login_token_authorizes_protected_calls() {
    let world = LocalWorld::new(1);
    world.register("alice", "correct horse", 1).await.unwrap();
    world.register("bob", "battery staple", 2).await.unwrap();

    let api = world.api();
    let alice = Session::login(&api, "alice", "correct horse").await.unwrap();
    let key = api.public_key(&alice, "bob").await.unwrap();
    assert_eq!(key, identity(2).public().to_bytes().to_vec());
}

#[tokio::test(start_paused = true)]
async fn token_of_another_user_is_invalid() {
    let world = LocalWorld::new(2);
    world.register("alice", "pw-alice", 1).await.unwrap();
    let bob = world.register("bob", "pw-bob", 2).await.unwrap();

    let forged = Request::authorized(
        "alice",
        bob.token().as_bytes(),
        RequestBody::GetPublicKey { username: "bob".into() },
    );
    let response = world.api().call(forged).await;
    assert_eq!(code(response), ErrorCode::TokenInvalid);
}

#[tokio::test(start_paused = true)]
async fn first_user_is_admin() {
    let world = LocalWorld::new(3);
    let alice = world.register("alice", "pw", 1).await.unwrap();
    let bob = world.register("bob", "pw", 2).await.unwrap();

    assert_eq!(alice.role(), Role::Admin);
    assert_eq!(bob.role(), Role::User);
    assert_eq!(world.api().list_users().await.unwrap(), vec!["alice", "bob"]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_and_malformed_registrations_rejected() {
    let world = LocalWorld::new(4);
    world.register("alice", "pw", 1).await.unwrap();

    assert_eq!(code(world.register("alice", "other", 2).await), ErrorCode::UserExists);

    let public_key = identity(3).public().to_bytes().to_vec();
    let result = world.api().register("x/../y", "pw", public_key).await;
    assert_eq!(code(result), ErrorCode::InvalidUsername);
}

#[tokio::test(start_paused = true)]
async fn login_does_not_reveal_which_usernames_exist() {
    let world = LocalWorld::new(5);
    world.register("alice", "pw", 1).await.unwrap();

    let api = world.api();
    assert_eq!(code(Session::login(&api, "alice", "wrong").await), ErrorCode::InvalidCredentials);
    assert_eq!(code(Session::login(&api, "nobody", "pw").await), ErrorCode::InvalidCredentials);
}

#[tokio::test(start_paused = true)]
async fn newer_login_supersedes_older_token() {
    let world = LocalWorld::new(6);
    world.register("alice", "pw", 1).await.unwrap();
    world.register("bob", "pw", 2).await.unwrap();

    let api = world.api();
    let first = Session::login(&api, "alice", "pw").await.unwrap();
    let second = Session::login_with_certificate(&api, &identity(1), "alice").await.unwrap();

    assert_eq!(code(api.public_key(&first, "bob").await), ErrorCode::TokenInvalid);
    api.public_key(&second, "bob").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn session_expires_after_fixed_window() {
    let config = DriverConfig { session_lifetime: Duration::from_secs(60), ..sim_config() };
    let world = LocalWorld::with_config(7, config);
    let alice = world.register("alice", "pw", 1).await.unwrap();
    world.register("bob", "pw", 2).await.unwrap();

    let api = world.api();
    tokio::time::advance(Duration::from_secs(59)).await;
    api.public_key(&alice, "bob").await.unwrap();

    // Using the token does not extend the window.
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(code(api.public_key(&alice, "bob").await), ErrorCode::TokenExpired);

    let fresh = Session::login(&api, "alice", "pw").await.unwrap();
    api.public_key(&fresh, "bob").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn certificate_login_signs_exact_nonce() {
    let world = LocalWorld::new(8);
    world.register("alice", "pw", 1).await.unwrap();
    let api = world.api();

    let session = Session::login_with_certificate(&api, &identity(1), "alice").await.unwrap();
    assert_eq!(session.username(), "alice");

    let mut nonce = api.begin_certificate_login("alice").await.unwrap();
    nonce[0] ^= 0x01;
    let tampered = identity(1).sign(&nonce).to_vec();
    assert_eq!(
        code(api.complete_certificate_login("alice", tampered).await),
        ErrorCode::BadSignature
    );
}

#[tokio::test(start_paused = true)]
async fn wrong_identity_cannot_certificate_login() {
    let world = LocalWorld::new(9);
    world.register("alice", "pw", 1).await.unwrap();

    let result = Session::login_with_certificate(&world.api(), &identity(99), "alice").await;
    assert_eq!(code(result), ErrorCode::BadSignature);
}

#[tokio::test(start_paused = true)]
async fn unknown_user_gets_no_challenge() {
    let world = LocalWorld::new(10);
    assert_eq!(
        code(world.api().begin_certificate_login("ghost").await),
        ErrorCode::UserNotFound
    );
}

#[tokio::test(start_paused = true)]
async fn challenge_rejected_after_expiry() {
    let world = LocalWorld::new(11);
    world.register("alice", "pw", 1).await.unwrap();
    let api = world.api();

    let nonce = api.begin_certificate_login("alice").await.unwrap();
    tokio::time::advance(DEFAULT_CHALLENGE_LIFETIME).await;

    let signature = identity(1).sign(&nonce).to_vec();
    assert_eq!(
        code(api.complete_certificate_login("alice", signature).await),
        ErrorCode::ChallengeExpired
    );
}

#[tokio::test(start_paused = true)]
async fn second_challenge_supersedes_first() {
    let world = LocalWorld::new(12);
    world.register("alice", "pw", 1).await.unwrap();
    let api = world.api();

    let stale = api.begin_certificate_login("alice").await.unwrap();
    let current = api.begin_certificate_login("alice").await.unwrap();
    assert_ne!(stale, current);

    let signature = identity(1).sign(&stale).to_vec();
    assert_eq!(
        code(api.complete_certificate_login("alice", signature).await),
        ErrorCode::BadSignature
    );

    // The failed attempt consumed the pending challenge.
    let signature = identity(1).sign(&current).to_vec();
    assert_eq!(
        code(api.complete_certificate_login("alice", signature).await),
        ErrorCode::ChallengeExpired
    );
}

#[tokio::test(start_paused = true)]
async fn challenge_is_single_use() {
    let world = LocalWorld::new(13);
    world.register("alice", "pw", 1).await.unwrap();
    let api = world.api();

    let nonce = api.begin_certificate_login("alice").await.unwrap();
    let signature = identity(1).sign(&nonce).to_vec();
    api.complete_certificate_login("alice", signature.clone()).await.unwrap();

    assert_eq!(
        code(api.complete_certificate_login("alice", signature).await),
        ErrorCode::ChallengeExpired
    );
}

#[tokio::test(start_paused = true)]
async fn blocking_is_admin_only_and_locks_the_account() {
    let world = LocalWorld::new(14);
    let alice = world.register("alice", "pw-alice", 1).await.unwrap();
    let bob = world.register("bob", "pw-bob", 2).await.unwrap();
    let api = world.api();

    assert_eq!(code(api.set_blocked(&bob, "alice", true).await), ErrorCode::Forbidden);

    api.set_blocked(&alice, "bob", true).await.unwrap();
    assert_eq!(code(api.public_key(&bob, "alice").await), ErrorCode::UserBlocked);
    assert_eq!(code(Session::login(&api, "bob", "pw-bob").await), ErrorCode::UserBlocked);
    assert_eq!(code(Session::login(&api, "bob", "nope").await), ErrorCode::InvalidCredentials);

    api.set_blocked(&alice, "bob", false).await.unwrap();
    let bob = Session::login(&api, "bob", "pw-bob").await.unwrap();
    api.public_key(&bob, "alice").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn password_hashing_does_not_hold_up_other_requests() {
    let world = LocalWorld::new(20);
    let alice = world.register("alice", "pw", 1).await.unwrap();
    let api = world.api();

    let finished = AtomicUsize::new(0);
    let login = async {
        let result = api.login("mallory", "guess").await;
        (result, finished.fetch_add(1, Ordering::SeqCst))
    };
    let fetch = async {
        let result = api.fetch_messages(&alice, "bob").await;
        (result, finished.fetch_add(1, Ordering::SeqCst))
    };

    let ((login, login_rank), (fetch, fetch_rank)) = tokio::join!(login, fetch);
    assert_eq!(code(login), ErrorCode::InvalidCredentials);
    assert!(fetch.unwrap().is_empty());
    assert!(fetch_rank < login_rank);
}
