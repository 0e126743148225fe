//! Outbound HTTP, feed link-relation parsing, and HMAC signing for the
//! WebSub hub.

pub mod client;
pub mod error;
pub mod feed;
pub mod signer;

pub use client::{default_user_agent, HttpClient, HttpResponse, WEBSUB_SPEC_TAG};
pub use error::Error;
pub use feed::{extract_link_relations, parse_link_header, LinkRelation};
pub use signer::{generate_challenge, sign};
