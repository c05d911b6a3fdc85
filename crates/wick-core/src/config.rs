use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::{AuthMethod, Credentials};
use crate::error::{Result, WickError};

pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_REALM: &str = "realm1";

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    #[default]
    Json,
    MsgPack,
    Cbor,
}

impl Serializer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Serializer::Json => "json",
            Serializer::MsgPack => "msgpack",
            Serializer::Cbor => "cbor",
        }
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Serializer {
    type Err = WickError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Serializer::Json),
            "msgpack" => Ok(Serializer::MsgPack),
            "cbor" => Ok(Serializer::Cbor),
            other => Err(WickError::UnknownSerializer(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectConfig
// ---------------------------------------------------------------------------

/// Everything needed to join a realm. Built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectConfig {
    pub url: String,
    pub realm: String,
    pub serializer: Serializer,
    pub auth_method: AuthMethod,
    pub authid: Option<String>,
    pub authrole: Option<String>,
    pub credentials: Credentials,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            realm: DEFAULT_REALM.to_string(),
            serializer: Serializer::Json,
            auth_method: AuthMethod::Anonymous,
            authid: None,
            authrole: None,
            credentials: Credentials::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// A named set of connection defaults. Every field is optional; unset
/// fields fall through to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub authmethod: Option<AuthMethod>,
    #[serde(default)]
    pub authid: Option<String>,
    #[serde(default)]
    pub authrole: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub ticket: Option<String>,
    #[serde(default)]
    pub serializer: Option<Serializer>,
}

impl Profile {
    /// Fill every unset field of `self` from `fallback`.
    pub fn or(self, fallback: Profile) -> Profile {
        Profile {
            url: self.url.or(fallback.url),
            realm: self.realm.or(fallback.realm),
            authmethod: self.authmethod.or(fallback.authmethod),
            authid: self.authid.or(fallback.authid),
            authrole: self.authrole.or(fallback.authrole),
            secret: self.secret.or(fallback.secret),
            private_key: self.private_key.or(fallback.private_key),
            ticket: self.ticket.or(fallback.ticket),
            serializer: self.serializer.or(fallback.serializer),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.private_key.clone(),
            self.ticket.clone(),
            self.secret.clone(),
        )
    }
}

/// The profile file: a mapping of profile name to [`Profile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileFile {
    pub profiles: BTreeMap<String, Profile>,
}

impl ProfileFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: ProfileFile = serde_yaml::from_str(&data)?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| WickError::ProfileNotFound(name.to_string()))
    }
}

/// `~/.wick/config.yaml`
pub fn default_profile_path() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(WickError::HomeNotFound)?;
    Ok(home.join(".wick").join("config.yaml"))
}

/// Load a named profile. A missing file means the profile does not exist.
pub fn load_profile(path: &Path, name: &str) -> Result<Profile> {
    if !path.exists() {
        return Err(WickError::ProfileNotFound(name.to_string()));
    }
    ProfileFile::load(path)?.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn serializer_names() {
        for name in ["json", "msgpack", "cbor"] {
            assert_eq!(name.parse::<Serializer>().unwrap().as_str(), name);
        }
        assert!("xml".parse::<Serializer>().is_err());
    }

    #[test]
    fn profile_roundtrip_and_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".wick/config.yaml");

        let mut file = ProfileFile::default();
        file.profiles.insert(
            "staging".into(),
            Profile {
                url: Some("ws://staging:8080/ws".into()),
                realm: Some("stage".into()),
                ticket: Some("tkt".into()),
                serializer: Some(Serializer::Cbor),
                ..Default::default()
            },
        );
        file.save(&path).unwrap();

        let profile = load_profile(&path, "staging").unwrap();
        assert_eq!(profile.url.as_deref(), Some("ws://staging:8080/ws"));
        assert_eq!(profile.serializer, Some(Serializer::Cbor));
        assert_eq!(profile.credentials().ticket.as_deref(), Some("tkt"));
    }

    #[test]
    fn parses_hand_written_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "prod:\n  url: ws://prod/ws\n  authmethod: wampcra\n  authid: alice\n  secret: pw\n",
        )
        .unwrap();

        let profile = load_profile(&path, "prod").unwrap();
        assert_eq!(profile.authmethod, Some(AuthMethod::WampCra));
        assert_eq!(profile.authid.as_deref(), Some("alice"));
        assert_eq!(profile.realm, None);
    }

    #[test]
    fn missing_profile_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let err = load_profile(&path, "nope").unwrap_err();
        assert!(matches!(err, WickError::ProfileNotFound(_)));

        std::fs::write(&path, "other:\n  realm: r\n").unwrap();
        let err = load_profile(&path, "nope").unwrap_err();
        assert_eq!(err.to_string(), "profile 'nope' not found");
    }

    #[test]
    fn or_prefers_self() {
        let flags = Profile {
            realm: Some("from-flag".into()),
            ..Default::default()
        };
        let profile = Profile {
            realm: Some("from-profile".into()),
            url: Some("ws://p".into()),
            ..Default::default()
        };
        let merged = flags.or(profile);
        assert_eq!(merged.realm.as_deref(), Some("from-flag"));
        assert_eq!(merged.url.as_deref(), Some("ws://p"));
    }
}
