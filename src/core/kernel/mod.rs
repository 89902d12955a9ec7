/// Bitex Kernel - transport and signing layer shared by all exchanges
///
/// The kernel holds no exchange-specific logic. Exchange behavior enters
/// through plugins (see [`crate::plugins`]); the kernel only knows how to
/// move a prepared request over the wire and how to attach credentials.
///
/// ## Transport
/// - `HttpAdapter`: connection adapter mounted on a session per URL prefix
/// - `ReqwestAdapter`: default adapter for `http://` and `https://`
/// - `RawResponse`: what an adapter hands back before response building
///
/// ## Authentication
/// - `Auth`: credential-signing object supplied by a plugin's auth provider
/// - `BasicAuth`: HTTP Basic auth used by the base plugin
///
/// # Example
/// ```rust,no_run
/// use bitex::core::kernel::*;
///
/// # fn example() -> Result<(), bitex::BitexError> {
/// let adapter = AdapterBuilder::new(AdapterConfig::new().with_timeout(10)).build()?;
/// let auth = BasicAuth::provider("api_key", "secret_key");
/// # let _ = (adapter, auth);
/// # Ok(())
/// # }
/// ```
pub mod rest;
pub mod signer;

pub use rest::{AdapterBuilder, AdapterConfig, HttpAdapter, RawBody, RawResponse, ReqwestAdapter};
pub use signer::{hmac_sha256_hex, Auth, BasicAuth};
