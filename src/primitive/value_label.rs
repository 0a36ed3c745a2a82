use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as DeError};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A value together with the label shown to the user.
///
/// Equality only looks at the value, the label is presentation. In config files
/// a value label may be written in full (`{"value": "No", "label": "😀 No"}`),
/// label-only (`{"label": "No"}`, value becomes the label) or in the shorthand
/// `{"No": "😀 No"}` form.
#[derive(Debug, Clone)]
pub struct ValueLabel<T = String> {
    pub value: T,
    pub label: String,
}

impl<T> ValueLabel<T> {
    pub fn new(value: T, label: impl Into<String>) -> ValueLabel<T> {
        ValueLabel {
            value,
            label: label.into(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValueLabel<U> {
        ValueLabel {
            value: f(self.value),
            label: self.label,
        }
    }
}

impl ValueLabel<String> {
    pub fn from_label(label: impl Into<String>) -> ValueLabel<String> {
        let label = label.into();
        ValueLabel {
            value: label.clone(),
            label,
        }
    }
}

impl<T: PartialEq> PartialEq for ValueLabel<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Serialize> Serialize for ValueLabel<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ValueLabel", 2)?;
        state.serialize_field("value", &self.value)?;
        state.serialize_field("label", &self.label)?;
        state.end()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ValueLabel<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = BTreeMap::<String, Value>::deserialize(deserializer)?;

        let is_shorthand =
            fields.len() == 1 && !fields.contains_key("value") && !fields.contains_key("label");
        if is_shorthand {
            if let Some((value, label)) = fields.into_iter().next() {
                let label = match label {
                    Value::String(label) => label,
                    _ => return Err(D::Error::custom("label must be a string")),
                };
                let value = T::deserialize(Value::String(value)).map_err(D::Error::custom)?;
                return Ok(ValueLabel { value, label });
            }
            return Err(D::Error::custom("empty value label"));
        }

        if fields.keys().any(|key| key != "value" && key != "label") {
            return Err(D::Error::custom(
                r#"value label may only be defined as {"value": value, "label": label} or {"value": "label"}"#,
            ));
        }

        let label = match fields.remove("label") {
            Some(Value::String(label)) => label,
            Some(_) => return Err(D::Error::custom("label must be a string")),
            None => return Err(D::Error::missing_field("label")),
        };
        let value = match fields.remove("value") {
            None | Some(Value::Null) => Value::String(label.clone()),
            Some(value) => value,
        };
        let value = T::deserialize(value).map_err(D::Error::custom)?;

        Ok(ValueLabel { value, label })
    }
}

#[cfg(test)]
mod tests {
    use super::ValueLabel;

    #[test]
    fn shorthand_form() {
        let vl: ValueLabel = serde_json::from_str(r#"{"No": "😀 No"}"#).unwrap();
        assert_eq!(vl.value, "No");
        assert_eq!(vl.label, "😀 No");
    }

    #[test]
    fn full_form_and_label_only() {
        let vl: ValueLabel = serde_json::from_str(r#"{"value": "1", "label": "One"}"#).unwrap();
        assert_eq!(vl.value, "1");
        assert_eq!(vl.label, "One");

        let vl: ValueLabel = serde_json::from_str(r#"{"label": "One"}"#).unwrap();
        assert_eq!(vl.value, "One");

        let vl: ValueLabel<i64> = serde_json::from_str(r#"{"value": 5, "label": "Five"}"#).unwrap();
        assert_eq!(vl.value, 5);
    }

    #[test]
    fn equality_ignores_label() {
        assert_eq!(ValueLabel::new("a".to_owned(), "x"), ValueLabel::new("a".to_owned(), "y"));
        assert_ne!(ValueLabel::new("a".to_owned(), "x"), ValueLabel::new("b".to_owned(), "x"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(serde_json::from_str::<ValueLabel>(r#"{"No": 1}"#).is_err());
        assert!(serde_json::from_str::<ValueLabel>(r#"{"a": "b", "c": "d"}"#).is_err());
        assert!(serde_json::from_str::<ValueLabel>(r#"{"value": "b"}"#).is_err());
    }

    #[test]
    fn serializes_full_form() {
        let vl = ValueLabel::new("No".to_owned(), "Nope");
        let json = serde_json::to_string(&vl).unwrap();
        assert_eq!(json, r#"{"value":"No","label":"Nope"}"#);
        assert_eq!(serde_json::from_str::<ValueLabel>(&json).unwrap().label, "Nope");
    }
}
