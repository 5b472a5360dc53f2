//! keyline core.
//!
//! Pure state machines and shared domain types. Nothing in this crate
//! performs I/O: time and randomness come in through [`env::Environment`],
//! and callers pass the current instant into every time-dependent method.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod challenge;
pub mod env;
pub mod error;
pub mod session;
pub mod system_env;
pub mod user;

pub use challenge::{
    CHALLENGE_NONCE_SIZE, ChallengeManager, ChallengeState, DEFAULT_CHALLENGE_LIFETIME,
    IssueOutcome,
};
pub use env::Environment;
pub use error::{ChallengeError, SessionError, UsernameError};
pub use session::{DEFAULT_SESSION_LIFETIME, SESSION_TOKEN_SIZE, SessionToken, validate_session};
pub use system_env::SystemEnv;
pub use user::{MAX_USERNAME_LEN, UserRecord, validate_username};
