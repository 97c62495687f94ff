//! Wire adapter.
//!
//! Translates JSON request bodies into typed calls on [`Ingress`] and typed
//! results back into JSON bodies. Every fixed-width value crosses the wire as
//! standard base64. HTTP routing lives outside podgate; a router maps
//! [`ErrorResponse::code`] to a status with [`ErrorResponse::is_client_error`].

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use podgate_types::{Address, IngressError, OrderFragmentMappings, OrderId, Result, Signature, TokenId};
use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::binder::{MatchDetails, OrderState};
use crate::codec::{WireOrderFragmentMappings, decode_fixed, unmarshal_order_fragment_mapping};
use crate::ingress::{Ingress, OrderStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderRequest {
    /// Trader address.
    pub address: String,
    /// Must match the order every fragment names, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Trader signature over the order authorization digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub order_fragment_mappings: WireOrderFragmentMappings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveWithdrawalRequest {
    pub trader: String,
    pub token_id: TokenId,
    /// Trader signature over the withdrawal digest at the current nonce.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    pub signature: String,
}

impl From<Signature> for SignatureResponse {
    fn from(signature: Signature) -> Self {
        Self {
            signature: STANDARD.encode(signature.as_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub state: OrderState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trader: Option<String>,
}

impl From<OrderStatus> for OrderStatusResponse {
    fn from(status: OrderStatus) -> Self {
        Self {
            order_id: STANDARD.encode(status.order_id.as_bytes()),
            state: status.state,
            trader: status.trader.map(|t| STANDARD.encode(t.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetailsResponse {
    pub settled: bool,
    pub order_is_buy: bool,
    pub matched_id: String,
    pub priority_volume: String,
    pub secondary_volume: String,
    pub priority_fee: String,
    pub secondary_fee: String,
    pub priority_token: TokenId,
    pub secondary_token: TokenId,
}

impl From<MatchDetails> for MatchDetailsResponse {
    fn from(details: MatchDetails) -> Self {
        Self {
            settled: details.settled,
            order_is_buy: details.order_is_buy,
            matched_id: STANDARD.encode(details.matched_id.as_bytes()),
            priority_volume: details.priority_volume.to_string(),
            secondary_volume: details.secondary_volume.to_string(),
            priority_fee: details.priority_fee.to_string(),
            secondary_fee: details.secondary_fee.to_string(),
            priority_token: details.priority_token,
            secondary_token: details.secondary_token,
        }
    }
}

/// Error body: the `PG_ERR_` code and its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    /// Validation or authentication failure: the caller's fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.code.starts_with("PG_ERR_1") || self.code.starts_with("PG_ERR_2")
    }
}

impl From<&IngressError> for ErrorResponse {
    fn from(err: &IngressError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// IngressAdapter
// ---------------------------------------------------------------------------

pub struct IngressAdapter {
    ingress: Arc<Ingress>,
    authenticator: Authenticator,
    require_order_signatures: bool,
}

impl IngressAdapter {
    #[must_use]
    pub fn new(ingress: Arc<Ingress>) -> Self {
        let authenticator = ingress.authenticator();
        let require_order_signatures = ingress.config().require_order_signatures;
        Self {
            ingress,
            authenticator,
            require_order_signatures,
        }
    }

    pub async fn open_order(&self, request: &OpenOrderRequest) -> Result<SignatureResponse> {
        let trader = decode_address(&request.address)?;
        let explicit = request
            .order_id
            .as_deref()
            .map(|id| {
                decode_fixed::<32>(id)
                    .map(OrderId)
                    .map_err(|reason| IngressError::MalformedOrderId { reason })
            })
            .transpose()?;
        let (order_id, mappings) = unmarshal_mappings(&request.order_fragment_mappings, explicit)?;

        match request.signature.as_deref() {
            Some(encoded) => {
                let signature = decode_signature(encoded)?;
                self.authenticator
                    .verify_order(&trader, &order_id, &mappings, &signature)?;
            }
            None if self.require_order_signatures => {
                return Err(IngressError::InvalidSignature {
                    reason: "order signature required".into(),
                });
            }
            None => {}
        }

        let signature = self.ingress.open_order(trader, order_id, mappings).await?;
        Ok(signature.into())
    }

    pub async fn approve_withdrawal(
        &self,
        request: &ApproveWithdrawalRequest,
    ) -> Result<SignatureResponse> {
        let trader = decode_address(&request.trader)?;
        let signature = decode_signature(&request.signature)?;
        let nonce = self
            .authenticator
            .verify_withdrawal(&trader, request.token_id, &signature)
            .await?;
        let approval = self
            .ingress
            .approve_withdrawal_at(trader, request.token_id, nonce)
            .await?;
        Ok(approval.into())
    }

    pub async fn order_status(&self, order_id: &str) -> Result<OrderStatusResponse> {
        let order_id = decode_order_id(order_id)?;
        Ok(self.ingress.order_status(order_id).await?.into())
    }

    pub async fn match_details(&self, order_id: &str) -> Result<MatchDetailsResponse> {
        let order_id = decode_order_id(order_id)?;
        Ok(self.ingress.match_details(order_id).await?.into())
    }
}

impl std::fmt::Debug for IngressAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressAdapter")
            .field("ingress", &self.ingress)
            .field("require_order_signatures", &self.require_order_signatures)
            .finish_non_exhaustive()
    }
}

/// Unmarshal every mapping; all must name the same order (and `explicit`,
/// if given).
fn unmarshal_mappings(
    wire: &WireOrderFragmentMappings,
    explicit: Option<OrderId>,
) -> Result<(OrderId, OrderFragmentMappings)> {
    let mut expected = explicit;
    let mut mappings = Vec::with_capacity(wire.len());
    for wire_mapping in wire {
        let (order_id, mapping) = unmarshal_order_fragment_mapping(wire_mapping)?;
        match expected {
            Some(want) if want != order_id => {
                return Err(IngressError::OrderIdMismatch {
                    expected: want,
                    actual: order_id,
                });
            }
            Some(_) => {}
            None => expected = Some(order_id),
        }
        mappings.push(mapping);
    }
    if mappings.is_empty() {
        return Err(IngressError::EmptyMapping);
    }
    let order_id = expected.ok_or(IngressError::EmptyMapping)?;
    Ok((order_id, mappings))
}

fn decode_address(encoded: &str) -> Result<Address> {
    decode_fixed::<20>(encoded)
        .map(Address)
        .map_err(|reason| IngressError::InvalidAddress { reason })
}

fn decode_order_id(encoded: &str) -> Result<OrderId> {
    decode_fixed::<32>(encoded)
        .map(OrderId)
        .map_err(|reason| IngressError::MalformedOrderId { reason })
}

fn decode_signature(encoded: &str) -> Result<Signature> {
    decode_fixed::<65>(encoded)
        .map(Signature)
        .map_err(|reason| IngressError::MalformedSignature { reason })
}

#[cfg(test)]
mod tests {
    use podgate_types::{OrderFragment, OrderFragmentMapping, PodHash};

    use super::*;
    use crate::codec::marshal_order_fragment_mapping;

    fn wire(order: &[OrderFragment]) -> WireOrderFragmentMappings {
        vec![marshal_order_fragment_mapping(&OrderFragmentMapping::dummy_single_pod(
            PodHash([4; 32]),
            order.to_vec(),
        ))]
    }

    #[test]
    fn mappings_for_one_order_accepted() {
        let fragments = OrderFragment::dummy_split(2);
        let order_id = fragments[0].order_id;
        let mut all = wire(&fragments);
        all.extend(wire(&fragments));
        let (id, mappings) = unmarshal_mappings(&all, Some(order_id)).unwrap();
        assert_eq!(id, order_id);
        assert_eq!(mappings.len(), 2);
    }

    #[test]
    fn mappings_for_different_orders_rejected() {
        let mut all = wire(&OrderFragment::dummy_split(2));
        all.extend(wire(&OrderFragment::dummy_split(2)));
        assert!(matches!(
            unmarshal_mappings(&all, None),
            Err(IngressError::OrderIdMismatch { .. })
        ));
    }

    #[test]
    fn explicit_order_id_must_match() {
        let all = wire(&OrderFragment::dummy_split(2));
        assert!(matches!(
            unmarshal_mappings(&all, Some(OrderId([0; 32]))),
            Err(IngressError::OrderIdMismatch { .. })
        ));
    }

    #[test]
    fn no_mappings_rejected() {
        assert!(matches!(
            unmarshal_mappings(&Vec::new(), None),
            Err(IngressError::EmptyMapping)
        ));
    }

    #[test]
    fn short_address_rejected() {
        let err = decode_address(&STANDARD.encode([1u8; 19])).unwrap_err();
        assert_eq!(err.code(), "PG_ERR_111");
        assert!(decode_address(&STANDARD.encode([1u8; 20])).is_ok());
    }

    #[test]
    fn error_response_carries_code() {
        let body = ErrorResponse::from(&IngressError::EmptyMapping);
        assert_eq!(body.code, "PG_ERR_109");
        assert!(body.is_client_error());
        assert!(!ErrorResponse::from(&IngressError::TopologyUnavailable).is_client_error());
    }

    #[test]
    fn open_order_request_json_shape() {
        let req: OpenOrderRequest = serde_json::from_str(
            r#"{ "address": "AQEBAQEBAQEBAQEBAQEBAQEBAQE=", "orderFragmentMappings": [] }"#,
        )
        .unwrap();
        assert!(req.order_id.is_none());
        assert!(req.signature.is_none());
        let back = serde_json::to_value(&req).unwrap();
        assert!(back.get("orderId").is_none());
    }
}
