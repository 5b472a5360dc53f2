//! Fuzz target for the server driver
//!
//! Feeds arbitrary request sequences from a small cast of users (with real
//! and forged credentials) through `ServerDriver`.
//!
//! # Invariants
//!
//! - Every request gets exactly one response with its own request id
//! - NEVER panic on any request sequence
//! - A successful drain leaves the mailbox empty
//! - Audit lines never contain a token

#![no_main]

use arbitrary::Arbitrary;
use keyline_crypto::{IdentityKeyPair, PasswordParams};
use keyline_harness::SimEnv;
use keyline_proto::{Request, RequestBody, Response};
use keyline_server::{DriverConfig, MemoryStorage, ServerAction, ServerDriver, ServerEvent, Storage};
use libfuzzer_sys::fuzz_target;

const USERS: [&str; 3] = ["alice", "bob", "carol"];

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Register { user: u8 },
    Login { user: u8, correct: bool },
    Certificate { user: u8, sign_right_bytes: bool },
    Send { from: u8, to: u8, body: Vec<u8> },
    Fetch { user: u8, from: u8 },
    Block { actor: u8, target: u8, blocked: bool },
    ForgedToken { user: u8, token: Vec<u8> },
    Tick,
}

fn user(index: u8) -> &'static str {
    USERS[index as usize % USERS.len()]
}

fn identity(index: u8) -> IdentityKeyPair {
    IdentityKeyPair::from_secret_bytes(&[index % USERS.len() as u8 + 1; 64])
}

struct Harness {
    driver: ServerDriver<SimEnv, MemoryStorage>,
    tokens: [Option<Vec<u8>>; 3],
    next_id: u64,
}

impl Harness {
    fn call(&mut self, request: Request) -> Response {
        let request_id = self.next_id;
        self.next_id += 1;

        let actions =
            self.driver.process_event_inline(ServerEvent::RequestReceived { request_id, request });
        let mut responses = Vec::new();
        for action in actions {
            match action {
                ServerAction::Respond { request_id: id, response } => {
                    assert_eq!(id, request_id, "response for the wrong request");
                    responses.push(response);
                },
                ServerAction::Audit { message } => {
                    for token in self.tokens.iter().flatten() {
                        let rendered: String = token.iter().map(|b| format!("{b:02x}")).collect();
                        assert!(!message.contains(&rendered), "token in audit line");
                    }
                },
                ServerAction::Log { .. } => {},
                ServerAction::HashPassword { .. } => panic!("password job left unrun"),
            }
        }
        assert_eq!(responses.len(), 1, "exactly one response per request");
        responses.remove(0)
    }

    fn authorized(&self, index: u8, body: RequestBody) -> Request {
        let slot = index as usize % USERS.len();
        let token = self.tokens[slot].clone().unwrap_or_default();
        Request::authorized(user(index), &token, body)
    }

    fn remember(&mut self, index: u8, response: &Response) {
        if let Response::LoggedIn { token, .. } | Response::Registered { token, .. } = response {
            self.tokens[index as usize % USERS.len()] = Some(token.clone());
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let config =
        DriverConfig { password_params: PasswordParams::minimal(), ..DriverConfig::default() };
    let mut h = Harness {
        driver: ServerDriver::new(SimEnv::with_seed(0), MemoryStorage::new(), config),
        tokens: [None, None, None],
        next_id: 0,
    };

    for op in ops.into_iter().take(64) {
        match op {
            Op::Register { user: index } => {
                let body = RequestBody::Register {
                    username: user(index).to_string(),
                    password: "pw".to_string(),
                    public_key: identity(index).public().to_bytes().to_vec(),
                };
                let response = h.call(Request::anonymous(body));
                h.remember(index, &response);
            },
            Op::Login { user: index, correct } => {
                let password = if correct { "pw" } else { "nope" };
                let body = RequestBody::Login {
                    username: user(index).to_string(),
                    password: password.to_string(),
                };
                let response = h.call(Request::anonymous(body));
                h.remember(index, &response);
            },
            Op::Certificate { user: index, sign_right_bytes } => {
                let body = RequestBody::BeginCertificateLogin { username: user(index).to_string() };
                let Response::Challenge { mut nonce } = h.call(Request::anonymous(body)) else {
                    continue;
                };
                if !sign_right_bytes {
                    nonce.push(0);
                }
                let body = RequestBody::CompleteCertificateLogin {
                    username: user(index).to_string(),
                    signature: identity(index).sign(&nonce).to_vec(),
                };
                let response = h.call(Request::anonymous(body));
                if !sign_right_bytes {
                    assert!(response.error_code().is_some(), "signature over wrong bytes accepted");
                }
                h.remember(index, &response);
            },
            Op::Send { from, to, body } => {
                let request = h.authorized(
                    from,
                    RequestBody::SendMessage { to: user(to).to_string(), ciphertext: body },
                );
                h.call(request);
            },
            Op::Fetch { user: index, from } => {
                let body = RequestBody::FetchMessages { from: user(from).to_string() };
                let request = h.authorized(index, body);
                if let Response::Messages { .. } = h.call(request) {
                    let pending =
                        h.driver.storage().pending_count(user(from), user(index)).unwrap_or(0);
                    assert_eq!(pending, 0, "drain left messages behind");
                }
            },
            Op::Block { actor, target, blocked } => {
                let request = h.authorized(
                    actor,
                    RequestBody::SetBlocked { username: user(target).to_string(), blocked },
                );
                h.call(request);
            },
            Op::ForgedToken { user: index, token } => {
                let request = Request::authorized(
                    user(index),
                    &token,
                    RequestBody::GetPublicKey { username: user(index).to_string() },
                );
                let response = h.call(request);
                let genuine = h.tokens[index as usize % USERS.len()].as_deref() == Some(&token[..]);
                if !genuine {
                    assert!(response.error_code().is_some(), "forged token accepted");
                }
            },
            Op::Tick => {
                let _ = h.driver.process_event(ServerEvent::Tick);
            },
        }
    }
});
