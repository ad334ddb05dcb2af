//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Signing covers `(request-target) host date` plus `digest` when a body
//! is present, using RSA-PKCS1v15-SHA256.

use crate::actor::ActorCache;
use crate::error::{FederationError, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};
use url::Url;

/// Headers to attach to a signed request
///
/// Derived per delivery attempt, never stored.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2822)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an HTTP request
///
/// Builds the canonical signing string over
/// `(request-target) host date [digest]` and signs it with the sender's
/// private key.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PKCS#8 PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders> {
    // 1. Parse URL to get host and path
    let parsed_url =
        Url::parse(url).map_err(|e| FederationError::Validation(format!("Invalid URL: {}", e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| FederationError::Validation("Missing host in URL".to_string()))?;

    let path = parsed_url.path();
    let path_and_query = if let Some(query) = parsed_url.query() {
        format!("{}?{}", path, query)
    } else {
        path.to_string()
    };

    // 2. Generate Date header (RFC 2822 format)
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    // 3. Generate Digest if body present
    let digest = body.map(generate_digest);

    // 4. Build signing string
    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);

    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];

    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    // 5. Sign with RSA-SHA256
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| FederationError::InvalidKey(format!("Invalid private key: {}", e)))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    // 6. Build Signature header
    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

/// Verify an inbound HTTP request signature
///
/// Consumed by the embedding server's inbox handler; the routing layer
/// supplies the headers and body, this crate supplies the algorithm.
///
/// # Errors
/// `Validation` when headers are missing, stale, or the signature does
/// not verify against the given public key.
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<()> {
    // 1. Parse Signature header
    let signature_header = headers
        .get("signature")
        .ok_or_else(|| FederationError::Validation("Missing Signature header".to_string()))?
        .to_str()
        .map_err(|_| FederationError::Validation("Invalid Signature header".to_string()))?;

    let parsed = parse_signature_header(signature_header)?;

    // 2. Validate algorithm and required signed headers.
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(FederationError::Validation(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(FederationError::Validation(format!(
                "Signed headers must include: {}",
                required
            )));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(FederationError::Validation(
            "Signed headers must include: digest".to_string(),
        ));
    }

    // 3. Verify Date is recent (within 5 minutes).
    let date_header = headers
        .get("date")
        .ok_or_else(|| FederationError::Validation("Missing Date header".to_string()))?;
    let date_str = date_header
        .to_str()
        .map_err(|_| FederationError::Validation("Invalid Date header".to_string()))?;

    let date = DateTime::parse_from_rfc2822(date_str)
        .map_err(|_| FederationError::Validation("Invalid Date format".to_string()))?;

    let now = Utc::now();
    let diff = (now.timestamp() - date.timestamp()).abs();

    if diff > 300 {
        return Err(FederationError::Validation(
            "Date header too old or in future".to_string(),
        ));
    }

    // 4. If body present, verify Digest.
    if let Some(body_data) = body {
        let digest_header = headers
            .get("digest")
            .ok_or_else(|| FederationError::Validation("Missing Digest header".to_string()))?;
        let digest_str = digest_header
            .to_str()
            .map_err(|_| FederationError::Validation("Invalid Digest header".to_string()))?;

        let expected_digest = generate_digest(body_data);
        if digest_str != expected_digest {
            return Err(FederationError::Validation("Digest mismatch".to_string()));
        }
    }

    // 5. Reconstruct signing string.
    let mut signing_parts = Vec::new();

    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            name @ ("host" | "date" | "digest") => headers
                .get(name)
                .ok_or_else(|| {
                    FederationError::Validation(format!("Missing {} header", name))
                })?
                .to_str()
                .map_err(|_| FederationError::Validation(format!("Invalid {} header", name)))?
                .to_string(),
            _ => {
                return Err(FederationError::Validation(format!(
                    "Unsupported header in signature: {}",
                    header_name
                )));
            }
        };

        signing_parts.push(format!("{}: {}", header_name, value));
    }

    let signing_string = signing_parts.join("\n");

    // 6. Verify RSA signature.
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| FederationError::Validation("Invalid signature encoding".to_string()))?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| FederationError::InvalidKey(format!("Invalid public key: {}", e)))?;

    // new_unprefixed for compatibility with mainstream fediverse servers
    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| FederationError::Validation(format!("Invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| FederationError::Validation("Signature verification failed".to_string()))?;

    Ok(())
}

/// Extract keyId from a request's Signature header.
pub fn extract_signature_key_id(headers: &http::HeaderMap) -> Result<String> {
    let signature_header = headers
        .get("signature")
        .ok_or_else(|| FederationError::Validation("Missing Signature header".to_string()))?
        .to_str()
        .map_err(|_| FederationError::Validation("Invalid Signature header".to_string()))?;

    let parsed = parse_signature_header(signature_header)?;
    Ok(parsed.key_id)
}

/// Validate that a signature keyId belongs to the claimed actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse a Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // Ignore unknown fields
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| FederationError::Validation("Missing keyId".to_string()))?,
        algorithm: algorithm
            .ok_or_else(|| FederationError::Validation("Missing algorithm".to_string()))?,
        headers: headers
            .ok_or_else(|| FederationError::Validation("Missing headers".to_string()))?,
        signature: signature
            .ok_or_else(|| FederationError::Validation("Missing signature".to_string()))?,
    })
}

/// Generate SHA-256 digest for a body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Fetch the public key PEM a keyId points at, through the actor cache
///
/// Strips the key fragment, loads the actor document, and checks that
/// the actor actually advertises the requested key id.
pub async fn fetch_public_key(key_id: &str, cache: &ActorCache) -> Result<String> {
    let actor_url_str = key_id.split('#').next().unwrap_or(key_id);
    let actor_url = Url::parse(actor_url_str)
        .map_err(|e| FederationError::Validation(format!("Invalid key id URL: {}", e)))?;

    let actor = cache.get_and_cache(&actor_url).await?;

    let public_key = actor
        .public_key
        .as_ref()
        .ok_or_else(|| FederationError::Validation("Actor advertises no public key".to_string()))?;

    if key_id.contains('#') && public_key.id != key_id {
        return Err(FederationError::Validation(
            "Signature keyId does not match actor public key id".to_string(),
        ));
    }

    Ok(public_key.public_key_pem.clone())
}
