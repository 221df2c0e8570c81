//! Serde adapters for the beacon API convention of transporting integers as
//! decimal strings.

pub mod quoted_u64 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s: &str = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(Error::custom)
    }
}

pub mod quoted_i64 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s: &str = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(Error::custom)
    }
}

pub mod quoted_u64_vec {
    use serde::ser::SerializeSeq;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
        let raw: Vec<&str> = Deserialize::deserialize(deserializer)?;
        raw.into_iter()
            .map(|s| s.parse().map_err(Error::custom))
            .collect()
    }
}

pub mod quoted_u64_nested_vec {
    use serde::ser::SerializeSeq;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Vec<u64>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for inner in values {
            let quoted: Vec<String> = inner.iter().map(|value| value.to_string()).collect();
            seq.serialize_element(&quoted)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u64>>, D::Error> {
        let raw: Vec<Vec<&str>> = Deserialize::deserialize(deserializer)?;
        raw.into_iter()
            .map(|inner| {
                inner
                    .into_iter()
                    .map(|s| s.parse().map_err(Error::custom))
                    .collect()
            })
            .collect()
    }
}

pub mod quoted_i64_opt {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => serializer.serialize_str(&inner.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let raw: Option<&str> = Deserialize::deserialize(deserializer)?;
        raw.map(|s| s.parse().map_err(Error::custom)).transpose()
    }
}

/// 0x-prefixed hex strings into raw bytes and back.
pub mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s: &str = Deserialize::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super::quoted_u64")]
        slot: u64,
        #[serde(with = "super::quoted_i64")]
        reward: i64,
        #[serde(with = "super::quoted_u64_vec")]
        validators: Vec<u64>,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Nested {
        #[serde(with = "super::quoted_u64_nested_vec")]
        aggregates: Vec<Vec<u64>>,
        #[serde(default, with = "super::quoted_i64_opt")]
        delay: Option<i64>,
        #[serde(with = "super::hex_bytes")]
        pubkey: Vec<u8>,
    }

    #[test]
    fn nested_and_optional_fields() {
        let json = r#"{"aggregates":[["1","2"],["3"]],"delay":"7","pubkey":"0x0a0b"}"#;
        let parsed: Nested = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            Nested {
                aggregates: vec![vec![1, 2], vec![3]],
                delay: Some(7),
                pubkey: vec![0x0a, 0x0b],
            }
        );

        let missing: Nested =
            serde_json::from_str(r#"{"aggregates":[],"pubkey":"0x"}"#).unwrap();
        assert_eq!(missing.delay, None);
        assert!(missing.pubkey.is_empty());
    }

    #[test]
    fn round_trips_decimal_strings() {
        let json = r#"{"slot":"24412640","reward":"-120","validators":["1","549417"]}"#;
        let parsed: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            Sample {
                slot: 24412640,
                reward: -120,
                validators: vec![1, 549417],
            }
        );
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(serde_json::from_str::<Sample>(r#"{"slot":"x","reward":"0","validators":[]}"#).is_err());
    }
}
