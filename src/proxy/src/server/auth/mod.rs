use crate::error::ProxyError;
use crate::protocol::mysql::constants::SCRAMBLE_SIZE;

use rand::Rng;
use sha1::{Digest, Sha1};
use std::sync::Arc;

pub mod identity;

use identity::{IdentityEntry, IdentityMap};

/// 20 random bytes for the handshake scramble. NUL and `$` are excluded,
/// clients treat them as terminators.
pub fn gen_scramble() -> [u8; SCRAMBLE_SIZE] {
    let mut rng = rand::thread_rng();
    let mut scramble = [0u8; SCRAMBLE_SIZE];
    for byte in scramble.iter_mut() {
        *byte = loop {
            let candidate: u8 = rng.gen_range(1..=126);
            if candidate != b'$' {
                break candidate;
            }
        };
    }
    scramble
}

/// The `mysql_native_password` client proof for a plaintext password:
/// `SHA1(password) XOR SHA1(scramble ++ SHA1(SHA1(password)))`. An empty
/// password proves itself with an empty response.
pub fn scramble_native_password(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2 = Sha1::digest(stage1);
    let mut salted = Sha1::new();
    salted.update(salt);
    salted.update(stage2);
    let mask = salted.finalize();
    stage1.iter().zip(mask).map(|(l, r)| l ^ r).collect()
}

/// In-memory authentication provider over the identity map. Consulted by
/// the wire server during the client handshake; on success it hands back
/// the full identity entry so the session knows which backend credentials
/// to pool under.
#[derive(Clone)]
pub struct AuthProvider {
    identities: Arc<IdentityMap>,
}

impl AuthProvider {
    pub fn new(identities: Arc<IdentityMap>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    pub fn authenticate(
        &self,
        username: &str,
        salt: &[u8],
        auth_response: &[u8],
    ) -> Result<IdentityEntry, ProxyError> {
        let entry = self.identities.backend_identity(username)?;
        let expected = scramble_native_password(&entry.proxy_password, salt);
        // fixed-shape comparison, no early exit on the first differing byte
        let matches = expected.len() == auth_response.len()
            && expected
                .iter()
                .zip(auth_response)
                .fold(0u8, |acc, (l, r)| acc | (l ^ r))
                == 0;
        if !matches {
            return Err(ProxyError::AccessDenied(username.to_string()));
        }
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn provider() -> AuthProvider {
        let config = ProxyConfig::from_yaml(
            r#"
authentication_map:
  - proxy_user: "appuser"
    proxy_password: "app-secret"
    backend_user: "svc_app"
    backend_password: "svc-secret"
  - proxy_user: "nopass"
    proxy_password: ""
    backend_user: "svc_nopass"
    backend_password: ""
"#,
        )
        .unwrap();
        AuthProvider::new(Arc::new(IdentityMap::from_config(&config)))
    }

    #[test]
    fn scramble_round_trip_authenticates() {
        let provider = provider();
        let salt = gen_scramble();
        let token = scramble_native_password("app-secret", &salt);
        let entry = provider.authenticate("appuser", &salt, &token).unwrap();
        assert_eq!(entry.backend_user, "svc_app");
    }

    #[test]
    fn wrong_password_is_denied() {
        let provider = provider();
        let salt = gen_scramble();
        let token = scramble_native_password("wrong", &salt);
        assert!(matches!(
            provider.authenticate("appuser", &salt, &token),
            Err(ProxyError::AccessDenied(_))
        ));
    }

    #[test]
    fn unknown_user_is_identity_not_found() {
        let provider = provider();
        let salt = gen_scramble();
        assert!(matches!(
            provider.authenticate("ghost", &salt, &[]),
            Err(ProxyError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn empty_password_wants_empty_proof() {
        let provider = provider();
        let salt = gen_scramble();
        assert!(provider.authenticate("nopass", &salt, &[]).is_ok());
        assert!(provider.authenticate("nopass", &salt, &[1]).is_err());
    }

    #[test]
    fn scramble_excludes_terminator_bytes() {
        for _ in 0..16 {
            let scramble = gen_scramble();
            assert!(scramble.iter().all(|&b| b != 0 && b != b'$' && b < 127));
        }
    }

    #[test]
    fn known_scramble_vector() {
        // fixed salt so the token is reproducible
        let salt = [7u8; SCRAMBLE_SIZE];
        let a = scramble_native_password("secret", &salt);
        let b = scramble_native_password("secret", &salt);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert!(scramble_native_password("", &salt).is_empty());
    }
}
