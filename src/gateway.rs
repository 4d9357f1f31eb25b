//! Signed request/callback codec for the hosted payment gateway.
//!
//! Both directions use the same canonical form: every non-empty parameter
//! except the hash fields, sorted by key, written as `key=value` with the value
//! URL-encoded and joined with `&`. `secure_hash` is the lowercase hex
//! HMAC-SHA512 of that string under the merchant secret.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha512;

use crate::domain::errors::DomainError;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH: &str = "secure_hash";
pub const SECURE_HASH_TYPE: &str = "secure_hash_type";
const PROTOCOL_VERSION: &str = "2.1.0";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub pay_url: String,
    pub merchant_code: String,
    pub secret: String,
    pub return_url: String,
    pub notify_url: String,
    pub expire_minutes: i64,
}

/// Callback fields, available only after the signature checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCallback {
    pub txn_ref: String,
    pub amount: i64,
    pub response_code: String,
    pub transaction_no: Option<String>,
    pub bank_code: Option<String>,
    pub pay_date: Option<String>,
}

pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && k.as_str() != SECURE_HASH && k.as_str() != SECURE_HASH_TYPE)
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn mac_for(params: &BTreeMap<String, String>, secret: &str) -> Result<HmacSha512, DomainError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| DomainError::Internal("gateway secret rejected by HMAC".to_string()))?;
    mac.update(canonical_query(params).as_bytes());
    Ok(mac)
}

pub fn sign(params: &BTreeMap<String, String>, secret: &str) -> Result<String, DomainError> {
    Ok(hex::encode(mac_for(params, secret)?.finalize().into_bytes()))
}

/// Constant-time check of `secure_hash` against the other parameters.
pub fn verify(params: &BTreeMap<String, String>, secret: &str) -> Result<(), DomainError> {
    let provided = params
        .get(SECURE_HASH)
        .ok_or(DomainError::InvalidSignature)?;
    let provided = hex::decode(provided.to_ascii_lowercase()).map_err(|_| DomainError::InvalidSignature)?;
    mac_for(params, secret)?
        .verify_slice(&provided)
        .map_err(|_| DomainError::InvalidSignature)
}

/// Builds the signed redirect URL for one payment attempt.
pub fn build_payment_url(
    config: &GatewayConfig,
    txn_ref: &str,
    amount: i64,
    order_info: &str,
    client_ip: &str,
    now: DateTime<Utc>,
) -> Result<String, DomainError> {
    if amount <= 0 {
        return Err(DomainError::Validation(
            "gateway payments need a positive amount".to_string(),
        ));
    }
    let expire_at = now + Duration::minutes(config.expire_minutes);
    let mut params = BTreeMap::new();
    params.insert("version".to_string(), PROTOCOL_VERSION.to_string());
    params.insert("command".to_string(), "pay".to_string());
    params.insert("merchant".to_string(), config.merchant_code.clone());
    params.insert("amount".to_string(), amount.to_string());
    params.insert("currency".to_string(), "VND".to_string());
    params.insert("txn_ref".to_string(), txn_ref.to_string());
    params.insert("order_info".to_string(), order_info.to_string());
    params.insert("order_type".to_string(), "other".to_string());
    params.insert("locale".to_string(), "vn".to_string());
    params.insert("return_url".to_string(), config.return_url.clone());
    params.insert("notify_url".to_string(), config.notify_url.clone());
    params.insert("ip_addr".to_string(), client_ip.to_string());
    params.insert("created_at".to_string(), now.format(TIMESTAMP_FORMAT).to_string());
    params.insert("expire_at".to_string(), expire_at.format(TIMESTAMP_FORMAT).to_string());

    let hash = sign(&params, &config.secret)?;
    Ok(format!(
        "{}?{}&{}={}",
        config.pay_url,
        canonical_query(&params),
        SECURE_HASH,
        hash
    ))
}

/// Verifies the signature, then extracts the callback fields. Nothing from an
/// unverified payload is read.
pub fn parse_callback(
    params: &BTreeMap<String, String>,
    secret: &str,
) -> Result<GatewayCallback, DomainError> {
    verify(params, secret)?;

    let required = |key: &str| {
        params
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| DomainError::Validation(format!("callback is missing '{key}'")))
    };
    let optional = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();

    let amount = required("amount")?
        .parse::<i64>()
        .map_err(|_| DomainError::Validation("callback amount is not an integer".to_string()))?;

    Ok(GatewayCallback {
        txn_ref: required("txn_ref")?,
        amount,
        response_code: required("response_code")?,
        transaction_no: optional("transaction_no"),
        bank_code: optional("bank_code"),
        pay_date: optional("pay_date"),
    })
}

/// Raw callback parameters as stored in `payment_gateway_response`.
pub fn payload_json(params: &BTreeMap<String, String>) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
