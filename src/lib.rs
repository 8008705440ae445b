//! `mailfetch`: normalize raw mail into structured records and deliver each
//! message at most once across overlapping time windows.
//!
//! The pipeline decodes MIME ([`parser::mime`]), derives an identity per
//! message ([`parser::identity`]), drops identities already recorded in the
//! durable seen-set ([`store::seen`]), applies a precise arrival-time window
//! ([`window`]), and cuts quoted reply history from the body ([`reply`]).

pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod reply;
pub mod source;
pub mod store;
pub mod window;
