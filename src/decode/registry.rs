//! The topic0 → signature descriptor registry: a hard-coded table of
//! well-known events, optionally extended at startup from the database's
//! `function_signatures`/event table, plus the `add_event_signature`
//! runtime admin operation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha3::{Digest, Keccak256};

use crate::model::{ParamDescriptor, SignatureDescriptor};

/// Computes the 32-byte topic0 for a canonical event signature, e.g.
/// `"Transfer(address,address,uint256)"`, the same derivation every EVM
/// client uses for log topics.
pub fn keccak_topic0(canonical_signature: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(canonical_signature.as_bytes());
    let digest = hasher.finalize();
    format!("0x{}", hex::encode(digest))
}

fn param(name: &str, kind: &str, indexed: bool) -> ParamDescriptor {
    ParamDescriptor {
        name: name.to_string(),
        kind: kind.to_string(),
        indexed,
    }
}

fn descriptor(name: &str, canonical_signature: &str, standard_tag: Option<&str>, params: Vec<ParamDescriptor>) -> (String, SignatureDescriptor) {
    let topic0 = keccak_topic0(canonical_signature);
    (
        topic0,
        SignatureDescriptor {
            name: name.to_string(),
            canonical_signature: canonical_signature.to_string(),
            standard_tag: standard_tag.map(str::to_string),
            params,
        },
    )
}

/// The hard-coded seed table: ERC-20/721/1155, OwnershipTransferred,
/// Pausable, AccessControl, Uniswap V2/V3.
fn seed_table() -> HashMap<String, SignatureDescriptor> {
    let mut table = HashMap::new();
    let entries = vec![
        descriptor(
            "Transfer",
            "Transfer(address,address,uint256)",
            Some("ERC20/ERC721"),
            vec![
                param("from", "address", true),
                param("to", "address", true),
                param("value", "uint256", false),
            ],
        ),
        descriptor(
            "Approval",
            "Approval(address,address,uint256)",
            Some("ERC20/ERC721"),
            vec![
                param("owner", "address", true),
                param("spender", "address", true),
                param("value", "uint256", false),
            ],
        ),
        descriptor(
            "ApprovalForAll",
            "ApprovalForAll(address,address,bool)",
            Some("ERC721/ERC1155"),
            vec![
                param("owner", "address", true),
                param("operator", "address", true),
                param("approved", "bool", false),
            ],
        ),
        descriptor(
            "TransferSingle",
            "TransferSingle(address,address,address,uint256,uint256)",
            Some("ERC1155"),
            vec![
                param("operator", "address", true),
                param("from", "address", true),
                param("to", "address", true),
                param("id", "uint256", false),
                param("value", "uint256", false),
            ],
        ),
        descriptor(
            "TransferBatch",
            "TransferBatch(address,address,address,uint256[],uint256[])",
            Some("ERC1155"),
            vec![
                param("operator", "address", true),
                param("from", "address", true),
                param("to", "address", true),
                param("ids", "uint256[]", false),
                param("values", "uint256[]", false),
            ],
        ),
        descriptor(
            "URI",
            "URI(string,uint256)",
            Some("ERC1155"),
            vec![param("value", "string", false), param("id", "uint256", true)],
        ),
        descriptor(
            "OwnershipTransferred",
            "OwnershipTransferred(address,address)",
            None,
            vec![param("previousOwner", "address", true), param("newOwner", "address", true)],
        ),
        descriptor("Paused", "Paused(address)", None, vec![param("account", "address", false)]),
        descriptor(
            "Unpaused",
            "Unpaused(address)",
            None,
            vec![param("account", "address", false)],
        ),
        descriptor(
            "RoleGranted",
            "RoleGranted(bytes32,address,address)",
            Some("AccessControl"),
            vec![
                param("role", "bytes32", true),
                param("account", "address", true),
                param("sender", "address", true),
            ],
        ),
        descriptor(
            "RoleRevoked",
            "RoleRevoked(bytes32,address,address)",
            Some("AccessControl"),
            vec![
                param("role", "bytes32", true),
                param("account", "address", true),
                param("sender", "address", true),
            ],
        ),
        descriptor(
            "RoleAdminChanged",
            "RoleAdminChanged(bytes32,bytes32,bytes32)",
            Some("AccessControl"),
            vec![
                param("role", "bytes32", true),
                param("previousAdminRole", "bytes32", true),
                param("newAdminRole", "bytes32", true),
            ],
        ),
        descriptor(
            "Swap",
            "Swap(address,uint256,uint256,uint256,uint256,address)",
            Some("UniswapV2"),
            vec![
                param("sender", "address", true),
                param("amount0In", "uint256", false),
                param("amount1In", "uint256", false),
                param("amount0Out", "uint256", false),
                param("amount1Out", "uint256", false),
                param("to", "address", true),
            ],
        ),
        descriptor(
            "Sync",
            "Sync(uint112,uint112)",
            Some("UniswapV2"),
            vec![param("reserve0", "uint112", false), param("reserve1", "uint112", false)],
        ),
        descriptor(
            "Mint",
            "Mint(address,uint256,uint256)",
            Some("UniswapV2"),
            vec![
                param("sender", "address", true),
                param("amount0", "uint256", false),
                param("amount1", "uint256", false),
            ],
        ),
        descriptor(
            "Burn",
            "Burn(address,uint256,uint256,address)",
            Some("UniswapV2"),
            vec![
                param("sender", "address", true),
                param("amount0", "uint256", false),
                param("amount1", "uint256", false),
                param("to", "address", true),
            ],
        ),
        descriptor(
            "Swap",
            "Swap(address,address,int256,int256,uint160,uint128,int24)",
            Some("UniswapV3"),
            vec![
                param("sender", "address", true),
                param("recipient", "address", true),
                param("amount0", "int256", false),
                param("amount1", "int256", false),
                param("sqrtPriceX96", "uint160", false),
                param("liquidity", "uint128", false),
                param("tick", "int24", false),
            ],
        ),
        descriptor(
            "Collect",
            "Collect(address,address,int24,int24,uint128,uint128)",
            Some("UniswapV3"),
            vec![
                param("owner", "address", true),
                param("recipient", "address", false),
                param("tickLower", "int24", true),
                param("tickUpper", "int24", true),
                param("amount0", "uint128", false),
                param("amount1", "uint128", false),
            ],
        ),
    ];
    for (topic0, descriptor) in entries {
        table.insert(topic0, descriptor);
    }
    table
}

/// Shared, swappable signature registry. Hard-coded entries win on
/// collision with anything loaded from the database.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, SignatureDescriptor>>>,
}

impl Registry {
    /// Builds the registry from the hard-coded table plus any
    /// externally-supplied descriptors (e.g. loaded from
    /// `function_signatures` at startup); hard-coded entries are
    /// re-inserted last so they always win.
    pub fn new(external: impl IntoIterator<Item = (String, SignatureDescriptor)>) -> Self {
        let mut table: HashMap<String, SignatureDescriptor> = external.into_iter().collect();
        table.extend(seed_table());
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    pub fn lookup(&self, topic0: &str) -> Option<SignatureDescriptor> {
        self.inner
            .read()
            .expect("signature registry lock is poisoned")
            .get(topic0)
            .cloned()
    }

    /// The `add_event_signature` admin operation: registers or
    /// overwrites a descriptor at runtime.
    pub fn add_event_signature(&self, topic0: String, descriptor: SignatureDescriptor) {
        self.inner
            .write()
            .expect("signature registry lock is poisoned")
            .insert(topic0, descriptor);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_transfer_topic0_matches_known_hash() {
        // keccak256("Transfer(address,address,uint256)")
        assert_eq!(
            keccak_topic0("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn hard_coded_entry_wins_over_external() {
        let topic0 = keccak_topic0("Transfer(address,address,uint256)");
        let bogus_topic0 = keccak_topic0("Bogus()");
        let external = maplit::hashmap! {
            topic0.clone() => SignatureDescriptor {
                name: "Bogus".to_string(),
                canonical_signature: "Bogus()".to_string(),
                standard_tag: None,
                params: vec![],
            },
            bogus_topic0.clone() => SignatureDescriptor {
                name: "AlsoExternal".to_string(),
                canonical_signature: "Bogus()".to_string(),
                standard_tag: None,
                params: vec![],
            },
        };
        let registry = Registry::new(external);
        assert_eq!(registry.lookup(&topic0).unwrap().name, "Transfer");
        assert_eq!(registry.lookup(&bogus_topic0).unwrap().name, "AlsoExternal");
    }

    #[test]
    fn add_event_signature_registers_custom_event() {
        let registry = Registry::default();
        let topic0 = keccak_topic0("CustomEvent(uint256)");
        assert!(registry.lookup(&topic0).is_none());
        registry.add_event_signature(
            topic0.clone(),
            SignatureDescriptor {
                name: "CustomEvent".to_string(),
                canonical_signature: "CustomEvent(uint256)".to_string(),
                standard_tag: None,
                params: vec![param("value", "uint256", false)],
            },
        );
        assert!(registry.lookup(&topic0).is_some());
    }

    #[test]
    fn unknown_topic0_returns_none() {
        let registry = Registry::default();
        assert!(registry.lookup("0xdeadbeef").is_none());
    }
}
