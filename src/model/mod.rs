//! Record types produced by the decoder and returned by the batch operation.

pub mod address;
pub mod attachment;
pub mod mail;
