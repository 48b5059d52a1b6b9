//! The closed set of chains this service knows how to scan, and the
//! per-chain configuration needed to do it.

use crate::h160_hexadecimal::HexadecimalH160;
use anyhow::{Context as _, Result};
use primitive_types::H160;
use serde_with::serde_as;
use std::{fmt, str::FromStr};
use structopt::clap::arg_enum;

arg_enum! {
    /// An opaque chain tag drawn from a closed set. Adding a new chain means
    /// adding a variant here plus an entry in the deployment table; nothing
    /// else in the scanner core is chain-specific.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
    pub enum Chain {
        Ethereum,
        Arbitrum,
        Base,
    }
}

/// Per-chain configuration: where the NFPM contract lives, which endpoint to
/// query it through, and whether that endpoint understands the
/// `finalized`/`safe` block tags (see `shared::block_info`).
#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChainConfig {
    #[serde_as(as = "HexadecimalH160")]
    pub nfpm_address: H160,
    pub rpc_url: String,
    pub supports_finalized: bool,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Parses one `chain=address,rpc_url,supports_finalized` triple out of the
/// `SCAN_CHAINS_CONFIG` environment variable (triples are `;`-separated,
/// see `shared::chain_config`).
pub fn parse_chain_config_entry(entry: &str) -> Result<(Chain, ChainConfig)> {
    let (chain_str, rest) = entry
        .split_once('=')
        .with_context(|| format!("chain config entry {:?} is missing '='", entry))?;
    let chain = Chain::from_str(chain_str)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("unknown chain {:?}", chain_str))?;
    let mut parts = rest.split(',');
    let address_str = parts
        .next()
        .with_context(|| format!("chain config entry {:?} is missing an address", entry))?;
    let rpc_url = parts
        .next()
        .with_context(|| format!("chain config entry {:?} is missing an rpc url", entry))?
        .to_string();
    let supports_finalized = parts
        .next()
        .with_context(|| format!("chain config entry {:?} is missing a finalized flag", entry))?
        .parse::<bool>()
        .with_context(|| format!("chain config entry {:?} has an invalid finalized flag", entry))?;
    let address_str = address_str.strip_prefix("0x").unwrap_or(address_str);
    let mut nfpm_address = H160::zero();
    hex::decode_to_slice(address_str, nfpm_address.as_mut())
        .with_context(|| format!("chain config entry {:?} has an invalid address", entry))?;
    Ok((
        chain,
        ChainConfig {
            nfpm_address,
            rpc_url,
            supports_finalized,
        },
    ))
}
