//! mail-relay: labeled mail in, generated replies out, with the
//! filesystem as the queue between stages.

pub mod config;
pub mod error;
pub mod generator;
pub mod mailbox;
pub mod pipeline;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
