//! Serde helpers that carry big integers as decimal strings.

use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_str_radix(10))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    let digits = String::deserialize(deserializer)?;
    parse(&digits).map_err(de::Error::custom)
}

pub fn parse(digits: &str) -> Result<BigUint, String> {
    let digits = digits.trim();
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| format!("'{digits}' is not a decimal integer"))
}

pub mod option {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&value.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|digits| super::parse(&digits).map_err(de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "super")]
        value: BigUint,
        #[serde(with = "super::option", default)]
        maybe: Option<BigUint>,
    }

    #[test]
    fn test_decimal_strings() {
        let holder = Holder {
            value: BigUint::from(1_234_567_890_123_456_789u64) * 1000u32,
            maybe: None,
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"value":"1234567890123456789000","maybe":null}"#);
        assert_eq!(serde_json::from_str::<Holder>(&json).unwrap(), holder);
    }

    #[test]
    fn test_rejects_non_decimal() {
        assert!(parse("12a4").is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"value":"0x10"}"#).is_err());
    }
}
