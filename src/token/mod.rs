//! Token probe: classifies freshly-created contracts (ERC-165/20/721/1155)
//! and reads their metadata via synchronous `eth_call`s. Per-address
//! failures are captured as "no classification, no metadata" rather than
//! propagated — never blocks the rest of a batch.

use futures::stream::{self, StreamExt};
use primitive_types::U256;
use sha3::{Digest, Keccak256};

use crate::model::{Erc1155Token, Erc20Token, Erc721Token};
use crate::rpc::RpcClient;

const ERC165_INTERFACE_ID: &str = "01ffc9a7";
const ERC721_INTERFACE_ID: &str = "80ac58cd";
const ERC1155_INTERFACE_ID: &str = "d9b67a26";
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// First 4 bytes of `keccak256(signature)`, the function selector ABI
/// calls are dispatched by.
fn selector(signature: &str) -> [u8; 4] {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_address(address: &str) -> [u8; 32] {
    let mut word = [0u8; 32];
    let bytes = hex::decode(address.trim_start_matches("0x")).unwrap_or_default();
    if bytes.len() == 20 {
        word[12..].copy_from_slice(&bytes);
    }
    word
}

fn encode_uint256(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn encode_bytes4(id: [u8; 4]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..4].copy_from_slice(&id);
    word
}

fn call_data(signature: &str, word_args: &[[u8; 32]]) -> String {
    let mut data = selector(signature).to_vec();
    for word in word_args {
        data.extend_from_slice(word);
    }
    format!("0x{}", hex::encode(data))
}

/// Decodes a `bool`/non-empty-truthy return from `supportsInterface`: a
/// non-empty, non-all-zero return counts as `true`.
fn is_truthy_return(hex_data: &str) -> bool {
    let bytes = hex::decode(hex_data.trim_start_matches("0x")).unwrap_or_default();
    !bytes.is_empty() && bytes.iter().any(|b| *b != 0)
}

/// Decodes an ABI-encoded `string` return: offset/length/bytes layout,
/// rejecting lengths over 1,000 bytes, stripping NULs, trimming, and
/// mapping an empty result to `None`.
fn decode_string_return(hex_data: &str) -> Option<String> {
    let bytes = hex::decode(hex_data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 64 {
        return None;
    }
    let length = U256::from_big_endian(&bytes[32..64]).as_usize();
    if length > 1000 {
        return None;
    }
    let payload = bytes.get(64..64 + length)?;
    let text = String::from_utf8_lossy(payload).replace('\0', "");
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn decode_uint_return(hex_data: &str) -> Option<U256> {
    let bytes = hex::decode(hex_data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 32 {
        return None;
    }
    Some(U256::from_big_endian(&bytes[0..32]))
}

fn decode_uint8_return(hex_data: &str) -> Option<u8> {
    let value = decode_uint_return(hex_data)?;
    if value <= U256::from(255) {
        Some(value.as_u32() as u8)
    } else {
        None
    }
}

/// The result of probing one address: which standards it implements, and
/// whatever metadata each probe surfaced.
#[derive(Debug, Clone, Default)]
pub struct TokenProbeResult {
    pub is_erc20: bool,
    pub is_erc721: bool,
    pub is_erc1155: bool,
    pub erc20: Option<Erc20Token>,
    pub erc721: Option<Erc721Token>,
    pub erc1155: Option<Erc1155Token>,
}

async fn eth_call_ok(client: &RpcClient, address: &str, data: &str, block_number: u64) -> Option<String> {
    client.call(address, data, block_number).await.ok()
}

/// Classifies and fetches metadata for one address: ERC-165 first, then
/// ERC-721/1155 interface ids, falling back to an ERC-20 heuristic probe
/// if neither asserts.
pub async fn classify_and_fetch(client: &RpcClient, address: &str, block_number: u64) -> TokenProbeResult {
    let mut result = TokenProbeResult::default();

    let supports_interface = |id: &str| call_data("supportsInterface(bytes4)", &[encode_bytes4(hex4(id))]);
    let erc165_probe = eth_call_ok(
        client,
        address,
        &supports_interface(ERC165_INTERFACE_ID),
        block_number,
    )
    .await;
    let is_erc165 = erc165_probe.as_deref().map(is_truthy_return).unwrap_or(false);

    if is_erc165 {
        let (erc721_resp, erc1155_resp) = futures::join!(
            eth_call_ok(client, address, &supports_interface(ERC721_INTERFACE_ID), block_number),
            eth_call_ok(client, address, &supports_interface(ERC1155_INTERFACE_ID), block_number),
        );
        result.is_erc721 = erc721_resp.as_deref().map(is_truthy_return).unwrap_or(false);
        result.is_erc1155 = erc1155_resp.as_deref().map(is_truthy_return).unwrap_or(false);
    }

    if !result.is_erc721 && !result.is_erc1155 {
        let total_supply_call = call_data("totalSupply()", &[]);
        let decimals_call = call_data("decimals()", &[]);
        let balance_of_call = call_data("balanceOf(address)", &[encode_address(ZERO_ADDRESS)]);
        let (total_supply, decimals, balance_of) = futures::join!(
            eth_call_ok(client, address, &total_supply_call, block_number),
            eth_call_ok(client, address, &decimals_call, block_number),
            eth_call_ok(client, address, &balance_of_call, block_number),
        );
        result.is_erc20 = [&total_supply, &decimals, &balance_of]
            .iter()
            .all(|r| r.as_ref().map(|s| s != "0x").unwrap_or(false));
    }

    if result.is_erc20 {
        result.erc20 = Some(fetch_erc20_metadata(client, address, block_number).await);
    }
    if result.is_erc721 {
        result.erc721 = Some(fetch_erc721_metadata(client, address, block_number).await);
    }
    if result.is_erc1155 {
        result.erc1155 = Some(fetch_erc1155_metadata(client, address, block_number).await);
    }

    result
}

fn hex4(id: &str) -> [u8; 4] {
    let bytes = hex::decode(id).unwrap_or_default();
    let mut out = [0u8; 4];
    if bytes.len() == 4 {
        out.copy_from_slice(&bytes);
    }
    out
}

async fn fetch_erc20_metadata(client: &RpcClient, address: &str, block_number: u64) -> Erc20Token {
    let (name, symbol, decimals, total_supply) = futures::join!(
        eth_call_ok(client, address, &call_data("name()", &[]), block_number),
        eth_call_ok(client, address, &call_data("symbol()", &[]), block_number),
        eth_call_ok(client, address, &call_data("decimals()", &[]), block_number),
        eth_call_ok(client, address, &call_data("totalSupply()", &[]), block_number),
    );
    Erc20Token {
        address: address.to_string(),
        name: name.as_deref().and_then(decode_string_return),
        symbol: symbol.as_deref().and_then(decode_string_return),
        decimals: decimals.as_deref().and_then(decode_uint8_return),
        total_supply: total_supply
            .as_deref()
            .and_then(decode_uint_return)
            .map(crate::model::u256_to_decimal),
    }
}

async fn fetch_erc721_metadata(client: &RpcClient, address: &str, block_number: u64) -> Erc721Token {
    let (name, symbol, total_supply) = futures::join!(
        eth_call_ok(client, address, &call_data("name()", &[]), block_number),
        eth_call_ok(client, address, &call_data("symbol()", &[]), block_number),
        eth_call_ok(client, address, &call_data("totalSupply()", &[]), block_number),
    );
    Erc721Token {
        address: address.to_string(),
        name: name.as_deref().and_then(decode_string_return),
        symbol: symbol.as_deref().and_then(decode_string_return),
        total_supply: total_supply
            .as_deref()
            .and_then(decode_uint_return)
            .map(crate::model::u256_to_decimal),
    }
}

async fn fetch_erc1155_metadata(client: &RpcClient, address: &str, block_number: u64) -> Erc1155Token {
    let uri_call = call_data("uri(uint256)", &[encode_uint256(U256::zero())]);
    let uri = eth_call_ok(client, address, &uri_call, block_number).await;
    Erc1155Token {
        address: address.to_string(),
        uri: uri.as_deref().and_then(decode_string_return),
    }
}

/// Processes `addresses` with a bounded fan-out (default 3 concurrent),
/// pairing each result with its address so callers can isolate failures
/// per address.
pub async fn batch_detect_tokens(
    client: &RpcClient,
    addresses: &[String],
    block_number: u64,
    concurrency: usize,
) -> Vec<(String, TokenProbeResult)> {
    stream::iter(addresses.iter().cloned())
        .map(|address| {
            let client = client.clone();
            async move {
                let result = classify_and_fetch(&client, &address, block_number).await;
                (address, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_truthy_return_rejects_empty_and_zero() {
        assert!(!is_truthy_return("0x"));
        assert!(!is_truthy_return(&format!("0x{:0>64}", "0")));
        assert!(is_truthy_return(&format!("0x{:0>64x}", 1)));
    }

    #[test]
    fn decode_string_return_strips_nul_and_trims() {
        let mut payload = b"USD Coin\0\0\0".to_vec();
        payload.resize(32, 0);
        let mut hex_data = String::new();
        hex_data.push_str(&format!("{:0>64x}", 0x20));
        hex_data.push_str(&format!("{:0>64x}", 8));
        hex_data.push_str(&hex::encode(payload));
        let decoded = decode_string_return(&format!("0x{hex_data}"));
        assert_eq!(decoded, Some("USD Coin".to_string()));
    }

    #[test]
    fn decode_string_return_rejects_overlong_length() {
        let mut hex_data = String::new();
        hex_data.push_str(&format!("{:0>64x}", 0x20));
        hex_data.push_str(&format!("{:0>64x}", 2000));
        assert_eq!(decode_string_return(&format!("0x{hex_data}")), None);
    }

    #[test]
    fn decode_uint8_return_validates_range() {
        assert_eq!(decode_uint8_return(&format!("0x{:0>64x}", 18)), Some(18));
        assert_eq!(decode_uint8_return(&format!("0x{:0>64x}", 300)), None);
    }

    #[test]
    fn selector_matches_known_function_selector() {
        // keccak256("totalSupply()")[0..4] == 0x18160ddd
        assert_eq!(hex::encode(selector("totalSupply()")), "18160ddd");
    }
}
