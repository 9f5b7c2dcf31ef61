//! Hash-based load balancing strategy.
//!
//! The routing key is the user id when present, otherwise the client IP,
//! otherwise a fixed fallback. Its MD5 digest, read as a big-endian 128-bit
//! integer, is reduced modulo the number of healthy backends.
//!
//! Modulo reduction means a key moves whenever the healthy set changes size.
//! There is no consistent-hash ring.

use std::sync::Arc;

use md5::{Digest, Md5};

use crate::config::StrategyKind;
use crate::load_balancer::{RequestContext, SelectionStrategy, backend::Backend};

/// Key used when the request carries neither a user id nor a client IP.
pub const FALLBACK_KEY: &str = "default";

#[derive(Debug, Default)]
pub struct HashBased;

impl HashBased {
    pub fn new() -> Self {
        Self
    }
}

/// Routing key for a request.
pub fn routing_key(ctx: &RequestContext) -> &str {
    ctx.user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or(ctx.client_ip.as_deref())
        .unwrap_or(FALLBACK_KEY)
}

/// Index of `key` in a pool of `len` backends.
pub fn bucket(key: &str, len: usize) -> usize {
    let digest = Md5::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    (u128::from_be_bytes(bytes) % len as u128) as usize
}

impl SelectionStrategy for HashBased {
    fn select(&self, healthy: &[Arc<Backend>], ctx: &RequestContext) -> Option<Arc<Backend>> {
        if healthy.is_empty() {
            return None;
        }
        let index = bucket(routing_key(ctx), healthy.len());
        Some(healthy[index].clone())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::HashBased
    }
}
