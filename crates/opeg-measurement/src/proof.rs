//! Proof format checks.
//!
//! Format only: nothing here touches the network. Reachability of a URL
//! is checked off the consensus path and fed back through
//! `update_url_reliability`.

use opeg_core::MeasurementSource;

use crate::error::RejectReason;

pub const MIN_URL_LEN: usize = 10;
pub const MAX_URL_LEN: usize = 2048;
pub const MIN_PHOTO_HASH_LEN: usize = 32;

/// Parsed `"lat,lon,photohash"` triple. Coordinates in micro-degrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineProof {
    pub latitude_micro: i64,
    pub longitude_micro: i64,
    pub photo_hash: String,
}

pub fn validate_url_format(url: &str) -> Result<(), RejectReason> {
    if url.len() < MIN_URL_LEN || url.len() > MAX_URL_LEN {
        return Err(RejectReason::InvalidProof(format!(
            "url length {} outside [{}, {}]",
            url.len(),
            MIN_URL_LEN,
            MAX_URL_LEN
        )));
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| RejectReason::InvalidProof("url must use http or https".to_string()))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(RejectReason::InvalidProof("url has no host".to_string()));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(RejectReason::InvalidProof("url contains whitespace".to_string()));
    }
    Ok(())
}

fn parse_coordinate(raw: &str, limit: f64, name: &str) -> Result<i64, RejectReason> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| RejectReason::InvalidProof(format!("{} is not a number", name)))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(RejectReason::InvalidProof(format!("{} out of range", name)));
    }
    Ok((value * 1_000_000.0).round() as i64)
}

pub fn parse_offline_proof(proof: &str) -> Result<OfflineProof, RejectReason> {
    let parts: Vec<&str> = proof.split(',').collect();
    if parts.len() != 3 {
        return Err(RejectReason::InvalidProof(
            "offline proof must be \"lat,lon,photohash\"".to_string(),
        ));
    }
    let latitude_micro = parse_coordinate(parts[0], 90.0, "latitude")?;
    let longitude_micro = parse_coordinate(parts[1], 180.0, "longitude")?;
    let photo_hash = parts[2].trim();
    if photo_hash.len() < MIN_PHOTO_HASH_LEN || !photo_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RejectReason::InvalidProof(
            "photo hash must be hex, at least 32 characters".to_string(),
        ));
    }
    Ok(OfflineProof {
        latitude_micro,
        longitude_micro,
        photo_hash: photo_hash.to_ascii_lowercase(),
    })
}

/// Online sources prove with a URL, offline sources with GPS + photo hash
pub fn validate_proof(source: MeasurementSource, proof: &str) -> Result<(), RejectReason> {
    if source.is_offline() {
        parse_offline_proof(proof).map(|_| ())
    } else {
        validate_url_format(proof)
    }
}
