use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ForageableId);

/// One foraging location.
///
/// `id` is `None` until the store has assigned one. Field contents are not
/// validated here; callers check `name`/`address` before submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forageable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ForageableId>,
    pub name: String,
    pub address: String,
    pub in_season: bool,
    #[serde(default)]
    pub notes: String,
}

impl Forageable {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        in_season: bool,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            address: address.into(),
            in_season,
            notes: notes.into(),
        }
    }

    pub fn with_id(mut self, id: ForageableId) -> Self {
        self.id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_forageable_has_no_id() {
        let forageable = Forageable::new("Oak", "123 Main", true, "");
        assert_eq!(forageable.id, None);
        assert_eq!(forageable.with_id(ForageableId(7)).id, Some(ForageableId(7)));
    }

    #[test]
    fn serializes_id_as_plain_integer() {
        let forageable = Forageable::new("Chanterelle", "Forest Rd", false, "near creek")
            .with_id(ForageableId(42));
        let json = serde_json::to_value(&forageable).expect("serialize");
        assert_eq!(json["id"], 42);
        assert_eq!(json["in_season"], false);
    }

    #[test]
    fn deserializes_unsaved_forageable_without_notes() {
        let forageable: Forageable =
            serde_json::from_str(r#"{"name":"Ramps","address":"Hill","in_season":true}"#)
                .expect("deserialize");
        assert_eq!(forageable.id, None);
        assert!(forageable.notes.is_empty());
    }
}
