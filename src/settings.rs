//! Client configuration

use std::time::Duration;

use derive_builder::Builder;

use crate::backoff::BackoffPolicy;
use crate::serverset::codec::Encoding;
use crate::store::AclEntry;

/// Credentials passed through to the store on connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub scheme: String,
    pub token: Vec<u8>,
}

impl Credentials {
    /// The canonical `digest` scheme with `user:pass` UTF-8 token bytes.
    pub fn digest(user: &str, password: &str) -> Credentials {
        Credentials {
            scheme: "digest".to_string(),
            token: format!("{user}:{password}").into_bytes(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scheme.is_empty() || self.token.is_empty()
    }
}

/// Settings for a [StoreClient](crate::client::StoreClient)
///
/// # Example
/// ```rust
/// use coterie::settings::{ClientSettings, ClientSettingsBuilder, Credentials};
/// use std::time::Duration;
///
/// let settings = ClientSettingsBuilder::default()
///     .session_timeout(Duration::from_secs(5))
///     .credentials(Some(Credentials::digest("svc", "hunter2")))
///     .chroot(Some("/staging".to_string()))
///     .build()
///     .unwrap();
/// assert_eq!(settings.session_timeout, Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, Builder)]
#[builder(default)]
pub struct ClientSettings {
    /// Requested session timeout; ephemeral nodes outlive disconnects up to
    /// this long.
    pub session_timeout: Duration,

    /// Optional `(scheme, token)` credentials added to every new session.
    pub credentials: Option<Credentials>,

    /// Access-control list applied to nodes this client creates.
    pub acl: Vec<AclEntry>,

    /// Optional path prefix applied to all operations.
    pub chroot: Option<String>,

    /// Wire encoding for service instance records.
    pub encoding: Encoding,

    /// Backoff schedule for retryable store failures.
    pub backoff: BackoffPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            session_timeout: Duration::from_secs(10),
            credentials: None,
            acl: vec![AclEntry::open()],
            chroot: None,
            encoding: Encoding::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_credentials() {
        let credentials = Credentials::digest("user", "pass");
        assert_eq!(credentials.scheme, "digest");
        assert_eq!(credentials.token, b"user:pass".to_vec());
        assert!(!credentials.is_empty());

        let empty = Credentials {
            scheme: String::new(),
            token: b"x".to_vec(),
        };
        assert!(empty.is_empty());
    }

    #[test]
    fn builder_defaults() {
        let settings = ClientSettingsBuilder::default().build().unwrap();
        assert!(settings.credentials.is_none());
        assert_eq!(settings.acl, vec![AclEntry::open()]);
        assert_eq!(settings.encoding, Encoding::Json);
    }
}
