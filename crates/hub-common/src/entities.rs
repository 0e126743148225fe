//! Domain entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::database::ConversionError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(TopicId);
uuid_id!(SubscriptionId);
uuid_id!(VerificationId);

/// Digest algorithm used for topic content hashing and subscription HMAC
/// signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha512
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{s}")
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(ConversionError::UnknownValue(
                "HashAlgorithm".to_owned(),
                other.to_owned(),
            )),
        }
    }
}

/// A feed URL the hub knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub url: Url,
    pub created: DateTime<Utc>,

    pub lease_seconds_preferred: Option<i64>,
    pub lease_seconds_min: Option<i64>,
    pub lease_seconds_max: Option<i64>,

    pub publisher_validation_url: Option<Url>,
    pub content_hash_algorithm: HashAlgorithm,

    pub is_active: bool,
    pub is_deleted: bool,

    pub last_publish: Option<DateTime<Utc>>,
    pub content_fetch_next_attempt: Option<DateTime<Utc>>,
    pub content_fetch_attempts_since_success: i32,

    pub content_updated: Option<DateTime<Utc>>,
    pub content: Option<Vec<u8>>,
    pub content_hash: Option<String>,
    pub content_type: Option<String>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
}

/// Default lease durations applied when a [`Topic`] leaves all three lease
/// fields unset.
#[derive(Debug, Clone, Copy)]
pub struct TopicLeaseDefaults {
    pub preferred: i64,
    pub min: i64,
    pub max: i64,
}

impl Default for TopicLeaseDefaults {
    fn default() -> Self {
        Self {
            preferred: 10 * 24 * 3600,
            min: 2 * 3600,
            max: 365 * 24 * 3600,
        }
    }
}

impl Topic {
    /// Resolves the effective lease bounds, applying `defaults` for any
    /// field left unset.
    pub fn lease_bounds(&self, defaults: &TopicLeaseDefaults) -> (i64, i64, i64) {
        (
            self.lease_seconds_min.unwrap_or(defaults.min),
            self.lease_seconds_preferred.unwrap_or(defaults.preferred),
            self.lease_seconds_max.unwrap_or(defaults.max),
        )
    }

    pub fn requires_publisher_validation(&self) -> bool {
        self.publisher_validation_url.is_some()
    }
}

/// Claim row for an in-flight topic content fetch.
#[derive(Debug, Clone)]
pub struct TopicFetchClaim {
    pub topic_id: TopicId,
    pub claimant: String,
    pub claimed: DateTime<Utc>,
    pub claim_expires: DateTime<Utc>,
}

/// One append-only content-change record.
#[derive(Debug, Clone)]
pub struct TopicContentHistoryEntry {
    pub topic_id: TopicId,
    pub content_updated: DateTime<Utc>,
    pub content_size: i64,
    pub content_hash: String,
}

/// An active subscriber callback for a topic.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic_id: TopicId,
    pub callback: Url,

    pub created: DateTime<Utc>,
    pub verified: Option<DateTime<Utc>>,
    pub expires: DateTime<Utc>,

    pub secret: Option<String>,
    pub signature_algorithm: HashAlgorithm,

    pub http_remote_addr: Option<String>,
    pub http_from: Option<String>,

    pub content_delivered: Option<DateTime<Utc>>,
    pub latest_content_delivered: Option<DateTime<Utc>>,
    pub delivery_attempts_since_success: i32,
    pub delivery_next_attempt: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }
}

/// Claim row for an in-flight subscription delivery.
#[derive(Debug, Clone)]
pub struct SubscriptionDeliveryClaim {
    pub subscription_id: SubscriptionId,
    pub claimant: String,
    pub claimed: DateTime<Utc>,
    pub claim_expires: DateTime<Utc>,
}

/// Subscribe/unsubscribe/denied mode of a [`Verification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    Subscribe,
    Unsubscribe,
    Denied,
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationMode::Subscribe => "subscribe",
            VerificationMode::Unsubscribe => "unsubscribe",
            VerificationMode::Denied => "denied",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VerificationMode {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(VerificationMode::Subscribe),
            "unsubscribe" => Ok(VerificationMode::Unsubscribe),
            "denied" => Ok(VerificationMode::Denied),
            other => Err(ConversionError::UnknownValue(
                "VerificationMode".to_owned(),
                other.to_owned(),
            )),
        }
    }
}

/// A pending subscribe/unsubscribe/denial challenge.
#[derive(Debug, Clone)]
pub struct Verification {
    pub id: VerificationId,
    pub topic_id: TopicId,
    pub callback: Url,
    pub created: DateTime<Utc>,

    pub mode: VerificationMode,
    pub secret: Option<String>,
    pub signature_algorithm: HashAlgorithm,
    pub http_remote_addr: Option<String>,
    pub http_from: Option<String>,

    pub lease_seconds: i64,
    pub is_publisher_validated: bool,
    pub reason: Option<String>,
    pub request_id: Option<String>,

    pub attempts: i32,
    pub next_attempt: DateTime<Utc>,
}

/// Claim row for an in-flight verification, unique by `(topic_id,
/// callback)` rather than by verification id.
#[derive(Debug, Clone)]
pub struct VerificationClaim {
    pub topic_id: TopicId,
    pub callback: Url,
    pub claimant: String,
    pub claimed: DateTime<Utc>,
    pub claim_expires: DateTime<Utc>,
}

/// Admin login credentials. Referenced only to
/// document how the out-of-scope dispatcher authenticates; no engine reads
/// or writes this entity.
#[derive(Debug, Clone)]
pub struct Authentication {
    pub identifier: String,
    pub credential: String,
    pub otp_key: Option<String>,
    pub created: DateTime<Utc>,
    pub last_authentication: Option<DateTime<Utc>>,
}
