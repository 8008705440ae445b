//! Durable state: the seen-set of delivered message identities.

pub mod seen;
