use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

pub type HmacSha256 = Hmac<Sha256>;

const DATE_OF_BIRTH_FORMAT: &str = "%Y-%m-%d";

/// Identifying details of a student, as entered on the verification form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterProfile {
    pub name: String,
    pub class: String,
    pub division: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
}

impl VoterProfile {
    /// A copy with surrounding whitespace removed, suitable for storing.
    pub fn trimmed(&self) -> Self {
        Self {
            name: collapse_whitespace(&self.name),
            class: self.class.trim().to_string(),
            division: self.division.trim().to_string(),
            date_of_birth: self
                .date_of_birth
                .as_deref()
                .map(str::trim)
                .filter(|dob| !dob.is_empty())
                .map(str::to_string),
        }
    }
}

/// The canonical form of a profile that voter keys are derived from.
#[derive(Debug, PartialEq, Eq)]
struct NormalizedProfile {
    name: String,
    class: String,
    division: String,
    date_of_birth: Option<NaiveDate>,
}

impl NormalizedProfile {
    fn new(profile: &VoterProfile, require_date_of_birth: bool) -> Result<Self> {
        let name = collapse_whitespace(&profile.name).to_lowercase();
        let class = profile.class.trim().to_lowercase();
        let division = profile.division.trim().to_lowercase();
        for (field, value) in [("name", &name), ("class", &class), ("division", &division)] {
            if value.is_empty() {
                return Err(Error::InvalidProfile(format!("`{field}` is required")));
            }
        }

        let date_of_birth = match profile.date_of_birth.as_deref().map(str::trim) {
            Some(dob) if !dob.is_empty() => Some(
                NaiveDate::parse_from_str(dob, DATE_OF_BIRTH_FORMAT).map_err(|_| {
                    Error::InvalidProfile(format!(
                        "`dateOfBirth` must be a date of the form YYYY-MM-DD, got '{dob}'"
                    ))
                })?,
            ),
            _ if require_date_of_birth => {
                return Err(Error::InvalidProfile("`dateOfBirth` is required".to_string()))
            }
            _ => None,
        };

        Ok(Self {
            name,
            class,
            division,
            date_of_birth,
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable identity of a voter: the HMAC-SHA256 of their normalized profile.
///
/// The same student always maps to the same key, across restarts, as long as
/// the deployment's HMAC secret is unchanged. The profile cannot be recovered
/// from the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoterKey([u8; 32]);

impl VoterKey {
    /// A short prefix for log messages.
    pub fn short(&self) -> String {
        HEXLOWER.encode(&self.0[..4])
    }
}

impl Display for VoterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl FromStr for VoterKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| format!("voter key is not lowercase hex: {e}"))?;
        let bytes = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| format!("voter key must be 32 bytes, got {}", bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for VoterKey {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VoterKey> for String {
    fn from(key: VoterKey) -> Self {
        key.to_string()
    }
}

/// Derives [`VoterKey`]s from profiles.
#[derive(Clone)]
pub struct VoterIdentity {
    hmac_secret: Vec<u8>,
    require_date_of_birth: bool,
}

impl VoterIdentity {
    pub fn new(hmac_secret: &[u8], require_date_of_birth: bool) -> Self {
        Self {
            hmac_secret: hmac_secret.to_vec(),
            require_date_of_birth,
        }
    }

    /// Compute the key for the given profile.
    ///
    /// Every field is length-prefixed before hashing, so no two distinct
    /// normalized profiles feed the same bytes into the HMAC.
    pub fn compute_key(&self, profile: &VoterProfile) -> Result<VoterKey> {
        let normalized = NormalizedProfile::new(profile, self.require_date_of_birth)?;
        let date_of_birth = normalized
            .date_of_birth
            .map(|dob| dob.format(DATE_OF_BIRTH_FORMAT).to_string())
            .unwrap_or_default();

        let mut hmac =
            HmacSha256::new_from_slice(&self.hmac_secret).expect("HMAC can take key of any size");
        for field in [
            &normalized.name,
            &normalized.class,
            &normalized.division,
            &date_of_birth,
        ] {
            hmac.update(&(field.len() as u64).to_be_bytes());
            hmac.update(field.as_bytes());
        }
        let mut key = [0; 32];
        key.copy_from_slice(&hmac.finalize().into_bytes());
        Ok(VoterKey(key))
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl VoterProfile {
        pub fn example() -> Self {
            Self {
                name: "Jane Doe".to_string(),
                class: "10".to_string(),
                division: "A".to_string(),
                date_of_birth: None,
            }
        }

        pub fn example2() -> Self {
            Self {
                name: "John Smith".to_string(),
                class: "9".to_string(),
                division: "C".to_string(),
                date_of_birth: None,
            }
        }
    }

    impl VoterIdentity {
        pub fn example() -> Self {
            Self::new(b"test hmac secret", false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_case_and_whitespace() {
        let identity = VoterIdentity::example();
        let messy = VoterProfile {
            name: "  jANE    doe ".to_string(),
            class: " 10\t".to_string(),
            division: "a ".to_string(),
            date_of_birth: Some("   ".to_string()),
        };
        assert_eq!(
            identity.compute_key(&VoterProfile::example()).unwrap(),
            identity.compute_key(&messy).unwrap()
        );
    }

    #[test]
    fn distinct_profiles_get_distinct_keys() {
        let identity = VoterIdentity::example();
        let key1 = identity.compute_key(&VoterProfile::example()).unwrap();
        let key2 = identity.compute_key(&VoterProfile::example2()).unwrap();
        assert_ne!(key1, key2);

        // Moving characters between fields must not produce the same input.
        let shifted = VoterProfile {
            name: "Jane Doe1".to_string(),
            class: "0".to_string(),
            division: "A".to_string(),
            date_of_birth: None,
        };
        assert_ne!(key1, identity.compute_key(&shifted).unwrap());
    }

    #[test]
    fn key_is_stable_for_a_given_secret() {
        let profile = VoterProfile::example();
        let key = VoterIdentity::new(b"one", false).compute_key(&profile).unwrap();
        assert_eq!(
            key,
            VoterIdentity::new(b"one", false).compute_key(&profile).unwrap()
        );
        assert_ne!(
            key,
            VoterIdentity::new(b"two", false).compute_key(&profile).unwrap()
        );
    }

    #[test]
    fn missing_fields_are_invalid() {
        let identity = VoterIdentity::example();
        let mut profile = VoterProfile::example();
        profile.division = "  ".to_string();
        assert!(matches!(
            identity.compute_key(&profile),
            Err(Error::InvalidProfile(_))
        ));
    }

    #[test]
    fn date_of_birth_variant() {
        let strict = VoterIdentity::new(b"secret", true);
        assert!(matches!(
            strict.compute_key(&VoterProfile::example()),
            Err(Error::InvalidProfile(_))
        ));

        let mut profile = VoterProfile::example();
        profile.date_of_birth = Some("2009-02-30".to_string());
        assert!(matches!(
            strict.compute_key(&profile),
            Err(Error::InvalidProfile(_))
        ));

        profile.date_of_birth = Some(" 2009-02-28 ".to_string());
        let with_dob = strict.compute_key(&profile).unwrap();
        profile.date_of_birth = None;
        let lenient = VoterIdentity::new(b"secret", false);
        assert_ne!(with_dob, lenient.compute_key(&profile).unwrap());
    }

    #[test]
    fn key_text_round_trip() {
        let key = VoterIdentity::example()
            .compute_key(&VoterProfile::example())
            .unwrap();
        assert_eq!(key, key.to_string().parse().unwrap());
        assert_eq!(key.short().len(), 8);
        assert!("abc".parse::<VoterKey>().is_err());
    }
}
