//! Fragment mapping codec: wire form ⇄ typed mappings.
//!
//! Traders submit mappings as JSON objects keyed by base64 pod hash, with
//! every fixed-width field base64-encoded and every number a decimal string.
//! This module is the only place those strings are decoded: nothing
//! malformed gets past [`unmarshal_order_fragment_mapping`].
//!
//! Decoding is pure and deterministic. Any bad field fails the whole mapping;
//! there is no partial result.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use podgate_types::{
    CoExpShare, FragmentId, IngressError, OrderFragment, OrderFragmentMapping, OrderId,
    OrderParity, OrderType, PodHash, Result, TokenPair,
};
use serde::{Deserialize, Serialize};

/// One fragment as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireOrderFragment {
    pub index: i64,
    pub id: String,
    pub order_id: String,
    pub order_type: i8,
    pub order_parity: i8,
    pub order_settlement: u64,
    pub order_expiry: i64,
    pub tokens: String,
    /// `[co, exp]`
    pub price: Vec<String>,
    /// `[co, exp]`
    pub volume: Vec<String>,
    /// `[co, exp]`
    pub minimum_volume: Vec<String>,
    pub nonce: String,
    pub ciphertext: String,
}

/// Base64 pod hash → fragments for that pod.
pub type WireOrderFragmentMapping = BTreeMap<String, Vec<WireOrderFragment>>;

/// One wire mapping per redundancy set.
pub type WireOrderFragmentMappings = Vec<WireOrderFragmentMapping>;

// ---------------------------------------------------------------------------
// Unmarshal
// ---------------------------------------------------------------------------

/// Decode a wire mapping, returning the order every fragment belongs to.
///
/// # Errors
/// - `MalformedPodHash` for a key that is not base64 of exactly 32 bytes
/// - the field-specific `Malformed*` error of the first bad fragment
/// - `MalformedOrderId` if fragments disagree on their order
/// - `EmptyMapping` if the mapping holds no fragments
pub fn unmarshal_order_fragment_mapping(
    wire: &WireOrderFragmentMapping,
) -> Result<(OrderId, OrderFragmentMapping)> {
    let mut order_id: Option<OrderId> = None;
    let mut pods = BTreeMap::new();

    for (key, wire_fragments) in wire {
        let pod_hash = decode_pod_hash(key)?;

        let mut fragments = Vec::with_capacity(wire_fragments.len());
        for wire_fragment in wire_fragments {
            let fragment = unmarshal_order_fragment(wire_fragment)?;
            match order_id {
                None => order_id = Some(fragment.order_id),
                Some(expected) if expected != fragment.order_id => {
                    return Err(IngressError::MalformedOrderId {
                        reason: format!(
                            "fragments reference different orders: {} and {}",
                            expected.short(),
                            fragment.order_id.short()
                        ),
                    });
                }
                Some(_) => {}
            }
            fragments.push(fragment);
        }
        pods.insert(pod_hash, fragments);
    }

    let order_id = order_id.ok_or(IngressError::EmptyMapping)?;
    Ok((order_id, OrderFragmentMapping { order_id, pods }))
}

/// Decode one wire fragment.
pub fn unmarshal_order_fragment(wire: &WireOrderFragment) -> Result<OrderFragment> {
    let id = decode_fixed::<32>(&wire.id)
        .map(FragmentId)
        .map_err(|reason| IngressError::MalformedFragmentId { reason })?;
    let order_id = decode_fixed::<32>(&wire.order_id)
        .map(OrderId)
        .map_err(|reason| IngressError::MalformedOrderId { reason })?;
    let tokens = wire
        .tokens
        .parse::<u64>()
        .map(TokenPair)
        .map_err(|e| IngressError::MalformedTokens {
            reason: format!("{:?}: {e}", wire.tokens),
        })?;
    let price = decode_co_exp(&wire.price)
        .map_err(|reason| IngressError::MalformedPrice { reason })?;
    let volume = decode_co_exp(&wire.volume)
        .map_err(|reason| IngressError::MalformedVolume { reason })?;
    let minimum_volume = decode_co_exp(&wire.minimum_volume)
        .map_err(|reason| IngressError::MalformedMinimumVolume { reason })?;
    let nonce = wire
        .nonce
        .parse::<u64>()
        .map_err(|e| IngressError::MalformedOrder {
            reason: format!("nonce {:?}: {e}", wire.nonce),
        })?;
    let ciphertext = STANDARD
        .decode(&wire.ciphertext)
        .map_err(|e| IngressError::MalformedCiphertext {
            reason: e.to_string(),
        })?;

    Ok(OrderFragment {
        id,
        order_id,
        index: wire.index,
        order_type: OrderType::from_code(wire.order_type)?,
        order_parity: OrderParity::from_code(wire.order_parity)?,
        order_settlement: wire.order_settlement,
        order_expiry: wire.order_expiry,
        tokens,
        price,
        volume,
        minimum_volume,
        nonce,
        ciphertext,
    })
}

/// Decode a base64 pod hash key.
pub fn decode_pod_hash(key: &str) -> Result<PodHash> {
    decode_fixed::<32>(key)
        .map(PodHash)
        .map_err(|reason| IngressError::MalformedPodHash { reason })
}

/// Decode standard base64 into exactly `N` bytes.
pub(crate) fn decode_fixed<const N: usize>(encoded: &str) -> std::result::Result<[u8; N], String> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| format!("invalid base64 {encoded:?}: {e}"))?;
    <[u8; N]>::try_from(raw.as_slice())
        .map_err(|_| format!("expected {N} bytes, got {}", raw.len()))
}

/// `[co, exp]` as decimal strings.
fn decode_co_exp(pair: &[String]) -> std::result::Result<CoExpShare, String> {
    let [co, exp] = pair else {
        return Err(format!("expected 2 elements, got {}", pair.len()));
    };
    let co = co
        .parse::<u64>()
        .map_err(|e| format!("coefficient {co:?}: {e}"))?;
    let exp = exp
        .parse::<u64>()
        .map_err(|e| format!("exponent {exp:?}: {e}"))?;
    Ok(CoExpShare::new(co, exp))
}

// ---------------------------------------------------------------------------
// Marshal
// ---------------------------------------------------------------------------

/// Encode a fragment in wire form.
#[must_use]
pub fn marshal_order_fragment(fragment: &OrderFragment) -> WireOrderFragment {
    WireOrderFragment {
        index: fragment.index,
        id: STANDARD.encode(fragment.id.as_bytes()),
        order_id: STANDARD.encode(fragment.order_id.as_bytes()),
        order_type: fragment.order_type.code(),
        order_parity: fragment.order_parity.code(),
        order_settlement: fragment.order_settlement,
        order_expiry: fragment.order_expiry,
        tokens: fragment.tokens.0.to_string(),
        price: encode_co_exp(fragment.price),
        volume: encode_co_exp(fragment.volume),
        minimum_volume: encode_co_exp(fragment.minimum_volume),
        nonce: fragment.nonce.to_string(),
        ciphertext: STANDARD.encode(&fragment.ciphertext),
    }
}

/// Encode a mapping in wire form.
#[must_use]
pub fn marshal_order_fragment_mapping(mapping: &OrderFragmentMapping) -> WireOrderFragmentMapping {
    mapping
        .pods
        .iter()
        .map(|(pod, fragments)| {
            (
                STANDARD.encode(pod.as_bytes()),
                fragments.iter().map(marshal_order_fragment).collect(),
            )
        })
        .collect()
}

fn encode_co_exp(share: CoExpShare) -> Vec<String> {
    vec![share.co.to_string(), share.exp.to_string()]
}
