//! Traffic mixing parameters and route plans
//!
//! Each persona carries a [`MixingParameters`] set drawn at creation from
//! the configured mix factor. [`TrafficMixingPlanner::plan_route`] turns it
//! into a [`RoutePlan`] for a transport layer to honor. Nothing here sends
//! traffic; plans are configuration artifacts.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto;
use crate::error::MasqueError;
use crate::types::Persona;

/// Padding block sizes a transport may round payloads up to
pub const PADDING_BLOCKS: [usize; 6] = [256, 512, 1024, 2048, 4096, 8192];

/// Mix factor at and above which multi-path routing is enabled
pub const MULTI_PATH_THRESHOLD: f64 = 0.5;

/// Maximum hops in a route
pub const MAX_HOPS: u8 = 5;

/// Upper bound on per-hop delay
pub const MAX_DELAY_MS: u64 = 2000;

const HOP_TTL_STEP_SECS: u32 = 30;
const NODE_ID_LEN: usize = 8;

/// Per-persona transport mixing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingParameters {
    /// Fraction of cover traffic to interleave, 0.0..=1.0
    pub noise_level: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub hop_count: u8,
    pub multi_path_routing: bool,
    pub padding_block: usize,
}

impl MixingParameters {
    /// No noise, no delay, a single direct hop.
    pub fn direct() -> Self {
        Self {
            noise_level: 0.0,
            min_delay_ms: 0,
            max_delay_ms: 0,
            hop_count: 1,
            multi_path_routing: false,
            padding_block: PADDING_BLOCKS[0],
        }
    }

    /// Size a payload of `len` bytes is padded to.
    pub fn padded_len(&self, len: usize) -> usize {
        let block = self.padding_block.max(1);
        len.div_ceil(block).max(1) * block
    }
}

/// One hop of a planned route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub node_id: String,
    /// Hex X25519 public key; the secret half is discarded
    pub ephemeral_key: String,
    pub ttl_secs: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Ordered; empty when multi-path routing is disabled
    pub hops: Vec<RouteHop>,
    pub padding_block: usize,
    pub noise_level: f64,
}

impl RoutePlan {
    pub fn is_direct(&self) -> bool {
        self.hops.is_empty()
    }

    /// Sum of per-hop delays
    pub fn total_delay_ms(&self) -> u64 {
        self.hops.iter().map(|h| h.delay_ms).sum()
    }
}

/// Computes mixing parameters and route plans.
pub struct TrafficMixingPlanner;

impl TrafficMixingPlanner {
    /// Draw a fresh parameter set for `mix_factor` in (0, 1].
    pub fn generate_parameters(mix_factor: f64) -> Result<MixingParameters, MasqueError> {
        if !(mix_factor > 0.0 && mix_factor <= 1.0) {
            return Err(MasqueError::Validation(format!(
                "mix factor {} outside (0, 1]",
                mix_factor
            )));
        }
        let mut rng = crypto::seeded_rng()?;

        let noise_level = (mix_factor * rng.random_range(0.5..=1.0)).clamp(0.0, 1.0);
        let min_delay_ms = (50.0 * mix_factor) as u64 + rng.random_range(0..=50);
        let spread_ms = (500.0 * mix_factor) as u64 + rng.random_range(0..=250);
        let max_delay_ms = (min_delay_ms + spread_ms).min(MAX_DELAY_MS);
        let hop_count =
            (1 + (mix_factor * 3.0).round() as u8 + rng.random_range(0..=1)).min(MAX_HOPS);
        let padding_block = *PADDING_BLOCKS
            .choose(&mut rng)
            .ok_or_else(|| MasqueError::Crypto("empty padding table".to_string()))?;

        Ok(MixingParameters {
            noise_level,
            min_delay_ms,
            max_delay_ms,
            hop_count,
            multi_path_routing: mix_factor >= MULTI_PATH_THRESHOLD,
            padding_block,
        })
    }

    /// Plan a route for `persona`'s current parameters.
    pub fn plan_route(persona: &Persona) -> Result<RoutePlan, MasqueError> {
        Self::plan_for(&persona.crypto.mixing)
    }

    pub fn plan_for(params: &MixingParameters) -> Result<RoutePlan, MasqueError> {
        let mut hops = Vec::new();
        if params.multi_path_routing {
            let mut rng = crypto::seeded_rng()?;
            let hop_count = params.hop_count.clamp(1, MAX_HOPS);
            for position in 0..hop_count {
                let secret = StaticSecret::from(crypto::random_array::<32>()?);
                let ephemeral = PublicKey::from(&secret);
                let low = params.min_delay_ms.min(params.max_delay_ms);
                hops.push(RouteHop {
                    node_id: format!("relay-{}", hex::encode(crypto::random_bytes(NODE_ID_LEN)?)),
                    ephemeral_key: hex::encode(ephemeral.as_bytes()),
                    ttl_secs: u32::from(hop_count - position) * HOP_TTL_STEP_SECS,
                    delay_ms: rng.random_range(low..=params.max_delay_ms),
                });
            }
        }

        Ok(RoutePlan {
            hops,
            padding_block: params.padding_block,
            noise_level: params.noise_level,
        })
    }
}
