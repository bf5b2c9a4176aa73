use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{AvatarError, Result};

/// Aggregation key for avatar resolution (`account@domain`).
///
/// Case-insensitive: stored lower-cased.
#[derive(
    Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct BareIdentity(String);

impl BareIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this identity inside the override root.
    ///
    /// `@` becomes `_at_`. Every other byte outside `[a-z0-9.-]`, and a
    /// leading `.`, is percent-encoded, `_` and `%` included, so distinct
    /// identities never share a file.
    pub fn sanitized(&self) -> String {
        let mut out = String::with_capacity(self.0.len() + 3);
        for (index, c) in self.0.char_indices() {
            match c {
                '@' => out.push_str("_at_"),
                '.' if index == 0 => out.push_str("%2E"),
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') => {
                    out.push(c)
                }
                c => {
                    let mut buf = [0u8; 4];
                    for byte in c.encode_utf8(&mut buf).bytes() {
                        out.push_str(&format!("%{:02X}", byte));
                    }
                }
            }
        }
        out
    }
}

impl FromStr for BareIdentity {
    type Err = AvatarError;

    fn from_str(s: &str) -> Result<Self> {
        let identity: Identity = s.parse()?;
        Ok(identity.bare)
    }
}

impl Display for BareIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full identity: a bare identity plus the resource (device) that sent an
/// event. Only the federated-push channel addresses requests to it.
#[derive(
    Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Identity {
    bare: BareIdentity,
    resource: Option<String>,
}

impl Identity {
    pub fn bare(&self) -> &BareIdentity {
        &self.bare
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }
}

impl From<BareIdentity> for Identity {
    fn from(bare: BareIdentity) -> Self {
        Identity {
            bare,
            resource: None,
        }
    }
}

impl FromStr for Identity {
    type Err = AvatarError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) => (bare, Some(resource)),
            None => (s, None),
        };
        if bare.is_empty() || bare.chars().any(char::is_whitespace) {
            return Err(AvatarError::Parse);
        }
        let resource = resource
            .filter(|r| !r.is_empty())
            .map(str::to_owned);

        Ok(Identity {
            bare: BareIdentity(bare.to_lowercase()),
            resource,
        })
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}/{}", self.bare, resource),
            None => write!(f, "{}", self.bare),
        }
    }
}
