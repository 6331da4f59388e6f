use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::ConnectionProfile;

type HmacSha256 = Hmac<Sha256>;

/// Credentials carried by `Authorization: Bearer base64(clientID.signature)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerCredentials {
    pub client_id: String,
    pub signature: String,
}

/// Parse the Authorization header value.
pub fn parse_authorization_header(header: Option<&str>) -> Result<BearerCredentials, AppError> {
    let header = match header {
        Some(h) if !h.is_empty() => h,
        _ => return Err(AppError::unauthorized("Missing Authorization header")),
    };
    let invalid = || AppError::unauthorized("Invalid Authorization header");

    let mut parts = header.split(' ');
    let (scheme, token) = match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) => (scheme, token),
        _ => return Err(invalid()),
    };
    if scheme != "Bearer" {
        return Err(invalid());
    }

    let decoded = STANDARD.decode(token).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;

    let mut credentials = decoded.split('.');
    match (credentials.next(), credentials.next(), credentials.next()) {
        (Some(client_id), Some(signature), None) => Ok(BearerCredentials {
            client_id: client_id.to_string(),
            signature: signature.to_string(),
        }),
        _ => Err(invalid()),
    }
}

/// base64(HMAC-SHA256(body, secret))
pub fn sign_body(body: &[u8], secret: &str) -> Result<String, AppError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::internal_with_details("Error signing request body", e.to_string()))?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Compare the presented signature with the expected one in constant time.
pub fn verify_signature(body: &[u8], secret: &str, signature: &str) -> Result<bool, AppError> {
    let expected = sign_body(body, secret)?;
    Ok(expected.as_bytes().ct_eq(signature.as_bytes()).into())
}

/// Build the header value a client sends for `body`.
pub fn authorization_header(client_id: &str, secret: &str, body: &[u8]) -> Result<String, AppError> {
    let payload = format!("{}.{}", client_id, sign_body(body, secret)?);
    Ok(format!("Bearer {}", STANDARD.encode(payload)))
}

/// Decide whether a request for `profile` may proceed.
///
/// Public profiles always pass. Private ones need a valid signature over the raw
/// body from a client whose allow-list names the connection, sent from an allowed origin.
pub fn authorize(
    config: &Config,
    profile: &ConnectionProfile,
    authorization: Option<&str>,
    origin: Option<&str>,
    body: &[u8],
) -> Result<(), AppError> {
    if profile.is_public() {
        return Ok(());
    }

    let credentials = parse_authorization_header(authorization)?;

    let principal = config
        .principal(&credentials.client_id)
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    if !verify_signature(body, &principal.client_secret, &credentials.signature)? {
        return Err(AppError::unauthorized("Invalid token"));
    }

    if !principal.can_access(&profile.name) {
        return Err(AppError::unauthorized("User has not access to requested connection"));
    }

    // Origin is client supplied; this only stops casual cross-site use
    if !config.pgrest.cors.is_origin_allowed(origin.unwrap_or("")) {
        return Err(AppError::unauthorized("Unauthorized access from origin"));
    }

    tracing::debug!(
        client_id = %credentials.client_id,
        connection = %profile.name,
        "Request authorized"
    );
    Ok(())
}
