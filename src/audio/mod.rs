//! # Audio Module
//!
//! Voice playback core: one session per guild, replaceable at any time and
//! released automatically after a period of silence.
//!
//! ## Architecture
//!
//! ### [`registry`] - Guild Session Registry
//! - Map from guild to its live [`registry::SessionHandle`]
//! - `install` atomically returns the displaced session to its caller
//! - Per-guild player slot so that at most one sink drives a connection
//!
//! ### [`state`] - Playback State Machine
//! - Pure transition function over [`state::PlaybackState`]
//!
//! ### [`player`] - Playback Service
//! - `play` resolves the source, starts the transcoder and spawns the task
//!   that owns the session resources
//! - `stop` detaches the session synchronously and tears it down
//!
//! ### [`voice`] - Voice seam
//! - Traits implemented by the songbird gateway in `bot::voice` and by
//!   in-memory doubles in tests
//!
//! ## Session lifecycle
//!
//! ```text
//! play ──> Connecting ──> Ready ──> Playing ──> Idle ──(timeout)──> Destroyed
//!              │            │          │          │
//!              └────────────┴──────────┴──────────┴──(stop / replaced)──> Destroyed
//! ```
//!
//! A play request reserves its guild before opening the source, so requests
//! take effect in arrival order and `stop` reaches a request that is still
//! starting.
//!
//! Teardown is identical on every path: the transcode job is cancelled, the
//! player is stopped, the player slot is cleared if this session still holds
//! it, and the state is published as `Destroyed`. Voice is only left when no
//! session is installed, under the same per-guild lock a session holds while
//! connecting.

pub mod player;
pub mod registry;
pub mod state;
pub mod voice;
