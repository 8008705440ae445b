//! Message parsing: header decoding, MIME decoding, identity and MBOX splitting.

pub mod header;
pub mod identity;
pub mod mbox;
pub mod mime;
