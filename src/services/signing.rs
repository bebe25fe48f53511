//! Time-limited HMAC-SHA256 signed URLs for GET/PUT on a single object.
//!
//! The string to sign is the newline-joined list
//! `algorithm, METHOD, bucket, object, timestamp, expires`, using the
//! parameter values exactly as they appear in the URL. Any altered signed
//! parameter therefore yields a different signature.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{fmt, str::FromStr};
use thiserror::Error;
use url::Url;

pub const ALGORITHM: &str = "GOOG4-HMAC-SHA256";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
pub const MAX_EXPIRES_SECS: i64 = 7 * 24 * 60 * 60;

pub const PARAM_ALGORITHM: &str = "X-Goog-Algorithm";
pub const PARAM_DATE: &str = "X-Goog-Date";
pub const PARAM_EXPIRES: &str = "X-Goog-Expires";
pub const PARAM_SIGNATURE: &str = "X-Goog-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signed URL has expired")]
    Expired,
    #[error("signature does not match")]
    BadSignature,
    #[error("missing signed URL parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("invalid value for `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("invalid signing configuration: {0}")]
    Config(String),
}

/// Operations a signed URL may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignedMethod {
    Get,
    Put,
}

impl SignedMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for SignedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignedMethod {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            other => Err(SigningError::InvalidParameter {
                name: "method",
                reason: format!("`{}` cannot be signed", other),
            }),
        }
    }
}

/// A freshly issued URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub method: SignedMethod,
    pub expires_at: DateTime<Utc>,
}

/// The signed query parameters presented with a request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignedParams {
    #[serde(rename = "X-Goog-Algorithm")]
    pub algorithm: Option<String>,
    #[serde(rename = "X-Goog-Date")]
    pub timestamp: Option<String>,
    #[serde(rename = "X-Goog-Expires")]
    pub expires: Option<String>,
    #[serde(rename = "X-Goog-Signature")]
    pub signature: Option<String>,
}

#[derive(Clone)]
pub struct SignedUrlService {
    mac: HmacSha256,
    public_url: Url,
}

impl SignedUrlService {
    pub fn new(secret: &str, public_url: &str) -> Result<Self, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::Config("signing secret is empty".into()));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|err| SigningError::Config(err.to_string()))?;
        let public_url = Url::parse(public_url)
            .map_err(|err| SigningError::Config(format!("public url `{}`: {}", public_url, err)))?;
        if public_url.cannot_be_a_base() {
            return Err(SigningError::Config(format!(
                "public url `{}` cannot carry a path",
                public_url
            )));
        }
        Ok(Self { mac, public_url })
    }

    fn sign(
        &self,
        algorithm: &str,
        method: SignedMethod,
        bucket: &str,
        object: &str,
        timestamp: &str,
        expires: &str,
    ) -> HmacSha256 {
        let canonical =
            [algorithm, method.as_str(), bucket, object, timestamp, expires].join("\n");
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        mac
    }

    /// Issue a URL granting `method` on `bucket/object` for `expires_in_secs` from `now`.
    pub fn generate(
        &self,
        method: SignedMethod,
        bucket: &str,
        object: &str,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, SigningError> {
        if !(1..=MAX_EXPIRES_SECS).contains(&expires_in_secs) {
            return Err(SigningError::InvalidParameter {
                name: "expiresIn",
                reason: format!("must be between 1 and {} seconds", MAX_EXPIRES_SECS),
            });
        }
        if bucket.is_empty() || object.is_empty() {
            return Err(SigningError::InvalidParameter {
                name: "object",
                reason: "bucket and object are required".into(),
            });
        }

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let expires = expires_in_secs.to_string();
        let signature = hex::encode(
            self.sign(ALGORITHM, method, bucket, object, &timestamp, &expires)
                .finalize()
                .into_bytes(),
        );

        let mut url = self.public_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SigningError::Config("public url cannot carry a path".into()))?;
            segments.pop_if_empty().push("signed").push(bucket);
            segments.extend(object.split('/'));
        }
        url.query_pairs_mut()
            .append_pair(PARAM_ALGORITHM, ALGORITHM)
            .append_pair(PARAM_DATE, &timestamp)
            .append_pair(PARAM_EXPIRES, &expires)
            .append_pair(PARAM_SIGNATURE, &signature);

        // Second precision, as carried in the URL.
        let issued_at = parse_timestamp(&timestamp)?;
        Ok(SignedUrl {
            url: url.into(),
            method,
            expires_at: issued_at + Duration::seconds(expires_in_secs),
        })
    }

    /// Check a presented URL for `method` on `bucket/object`.
    ///
    /// The signature is checked first; only an authentic URL can report
    /// `Expired`.
    pub fn verify(
        &self,
        method: SignedMethod,
        bucket: &str,
        object: &str,
        params: &SignedParams,
        now: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        let algorithm = required(&params.algorithm, PARAM_ALGORITHM)?;
        let timestamp = required(&params.timestamp, PARAM_DATE)?;
        let expires = required(&params.expires, PARAM_EXPIRES)?;
        let signature = required(&params.signature, PARAM_SIGNATURE)?;

        let presented = hex::decode(signature).map_err(|_| SigningError::BadSignature)?;
        self.sign(algorithm, method, bucket, object, timestamp, expires)
            .verify_slice(&presented)
            .map_err(|_| SigningError::BadSignature)?;

        if algorithm != ALGORITHM {
            return Err(SigningError::InvalidParameter {
                name: PARAM_ALGORITHM,
                reason: format!("unsupported algorithm `{}`", algorithm),
            });
        }
        let issued_at = parse_timestamp(timestamp)?;
        let expires_in: i64 = expires.parse().map_err(|_| SigningError::InvalidParameter {
            name: PARAM_EXPIRES,
            reason: format!("`{}` is not a number of seconds", expires),
        })?;
        if now > issued_at + Duration::seconds(expires_in.clamp(0, MAX_EXPIRES_SECS)) {
            return Err(SigningError::Expired);
        }
        Ok(())
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, SigningError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(SigningError::MissingParameter(name))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SigningError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| SigningError::InvalidParameter {
            name: PARAM_DATE,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn service() -> SignedUrlService {
        SignedUrlService::new("test-secret", "http://localhost:4443").unwrap()
    }

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn params_of(url: &str) -> SignedParams {
        let url = Url::parse(url).unwrap();
        let mut params = SignedParams::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                PARAM_ALGORITHM => params.algorithm = value,
                PARAM_DATE => params.timestamp = value,
                PARAM_EXPIRES => params.expires = value,
                PARAM_SIGNATURE => params.signature = value,
                _ => {}
            }
        }
        params
    }

    #[test]
    fn generated_url_shape() {
        let signed = service()
            .generate(SignedMethod::Get, "bkt", "dir/a b.txt", 600, issued_at())
            .unwrap();
        let url = Url::parse(&signed.url).unwrap();
        assert_eq!(url.path(), "/signed/bkt/dir/a%20b.txt");
        let params = params_of(&signed.url);
        assert_eq!(params.algorithm.as_deref(), Some(ALGORITHM));
        assert_eq!(params.timestamp.as_deref(), Some("20240501T120000Z"));
        assert_eq!(params.expires.as_deref(), Some("600"));
        assert_eq!(params.signature.as_ref().map(String::len), Some(64));
        assert_eq!(signed.expires_at, issued_at() + Duration::seconds(600));
    }

    #[test]
    fn valid_url_verifies_until_expiry() {
        let svc = service();
        let signed = svc
            .generate(SignedMethod::Get, "bkt", "a.txt", 60, issued_at())
            .unwrap();
        let params = params_of(&signed.url);

        let within = issued_at() + Duration::seconds(60);
        assert!(svc.verify(SignedMethod::Get, "bkt", "a.txt", &params, within).is_ok());

        let after = issued_at() + Duration::seconds(61);
        assert!(matches!(
            svc.verify(SignedMethod::Get, "bkt", "a.txt", &params, after),
            Err(SigningError::Expired)
        ));
    }

    #[test]
    fn any_altered_parameter_breaks_the_signature() {
        let svc = service();
        let signed = svc
            .generate(SignedMethod::Put, "bkt", "a.txt", 60, issued_at())
            .unwrap();
        let params = params_of(&signed.url);
        let now = issued_at();

        let altered = [
            SignedParams { algorithm: Some("GOOG4-HMAC-SHA512".into()), ..params.clone() },
            SignedParams { timestamp: Some("20240501T120001Z".into()), ..params.clone() },
            SignedParams { expires: Some("61".into()), ..params.clone() },
            SignedParams { signature: Some("00".repeat(32)), ..params.clone() },
            SignedParams { signature: Some("not-hex".into()), ..params.clone() },
        ];
        for candidate in &altered {
            assert!(matches!(
                svc.verify(SignedMethod::Put, "bkt", "a.txt", candidate, now),
                Err(SigningError::BadSignature)
            ));
        }

        assert!(matches!(
            svc.verify(SignedMethod::Get, "bkt", "a.txt", &params, now),
            Err(SigningError::BadSignature)
        ));
        assert!(matches!(
            svc.verify(SignedMethod::Put, "other", "a.txt", &params, now),
            Err(SigningError::BadSignature)
        ));
        assert!(matches!(
            svc.verify(SignedMethod::Put, "bkt", "b.txt", &params, now),
            Err(SigningError::BadSignature)
        ));
    }

    #[test]
    fn different_secret_rejects() {
        let signed = service()
            .generate(SignedMethod::Get, "bkt", "a.txt", 60, issued_at())
            .unwrap();
        let other = SignedUrlService::new("another-secret", "http://localhost:4443").unwrap();
        assert!(matches!(
            other.verify(SignedMethod::Get, "bkt", "a.txt", &params_of(&signed.url), issued_at()),
            Err(SigningError::BadSignature)
        ));
    }

    #[test]
    fn missing_parameters_and_bounds() {
        let svc = service();
        assert!(matches!(
            svc.verify(SignedMethod::Get, "bkt", "a", &SignedParams::default(), issued_at()),
            Err(SigningError::MissingParameter(PARAM_ALGORITHM))
        ));
        assert!(svc.generate(SignedMethod::Get, "bkt", "a", 0, issued_at()).is_err());
        assert!(svc
            .generate(SignedMethod::Get, "bkt", "a", MAX_EXPIRES_SECS + 1, issued_at())
            .is_err());
        assert!(svc
            .generate(SignedMethod::Get, "bkt", "a", MAX_EXPIRES_SECS, issued_at())
            .is_ok());
        assert!("DELETE".parse::<SignedMethod>().is_err());
        assert_eq!("put".parse::<SignedMethod>().unwrap(), SignedMethod::Put);
    }
}
