//! Sample tracked record types
//!
//! A `Contact` with plain fields, an owned `Address` and a dictionary of owned
//! `Phone` entries. Used by the workspace tests and benchmarks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DbResult;
use crate::field::{Field, FieldSpec, FieldStore, SetOptions};
use crate::owned::{Owned, OwnedMap};
use crate::tracked::{raw_object, Record, TrackedObject};

/// Availability of a contact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Reachable
    #[default]
    Active,
    /// Temporarily unreachable
    Away,
    /// Kept for reference only
    Archived,
}

const FIRST_LINE: Field<String> = Field::new("FirstLine");
const CITY: Field<String> = Field::new("City");
static ADDRESS_SCHEMA: &[FieldSpec] = &[FIRST_LINE.spec(), CITY.spec()];

/// Postal address owned by a contact
pub struct Address {
    fields: FieldStore,
}

impl Address {
    /// Empty address
    pub fn new() -> Self {
        Self {
            fields: FieldStore::new(ADDRESS_SCHEMA),
        }
    }

    /// First address line
    pub fn first_line(&self) -> String {
        FIRST_LINE.get(&self.fields)
    }

    /// Change the first address line
    pub fn set_first_line(&self, value: impl Into<String>) -> DbResult<bool> {
        FIRST_LINE.set(&self.fields, value.into())
    }

    /// City
    pub fn city(&self) -> String {
        CITY.get(&self.fields)
    }

    /// Change the city
    pub fn set_city(&self, value: impl Into<String>) -> DbResult<bool> {
        CITY.set(&self.fields, value.into())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedObject for Address {
    fn fields(&self) -> &FieldStore {
        &self.fields
    }
}

impl Record for Address {
    fn from_raw(raw: &Value) -> DbResult<Self> {
        let address = Self::new();
        address.fields.load_raw(raw_object(raw, "Address")?)?;
        Ok(address)
    }
}

const NUMBER: Field<String> = Field::new("Number");
const PRIMARY: Field<bool> = Field::new("Primary");
static PHONE_SCHEMA: &[FieldSpec] = &[NUMBER.spec(), PRIMARY.spec()];

/// Phone number entry
pub struct Phone {
    fields: FieldStore,
}

impl Phone {
    /// Phone entry with a number
    pub fn new(number: impl Into<String>) -> Self {
        let phone = Self {
            fields: FieldStore::new(PHONE_SCHEMA),
        };
        // Silent writes to a declared field cannot fail
        let _ = NUMBER.set_with(&phone.fields, number.into(), SetOptions::silent());
        phone
    }

    /// Number
    pub fn number(&self) -> String {
        NUMBER.get(&self.fields)
    }

    /// Change the number
    pub fn set_number(&self, value: impl Into<String>) -> DbResult<bool> {
        NUMBER.set(&self.fields, value.into())
    }

    /// Whether this is the preferred number
    pub fn primary(&self) -> bool {
        PRIMARY.get(&self.fields)
    }

    /// Change the preferred flag
    pub fn set_primary(&self, value: bool) -> DbResult<bool> {
        PRIMARY.set(&self.fields, value)
    }
}

impl TrackedObject for Phone {
    fn fields(&self) -> &FieldStore {
        &self.fields
    }
}

impl Record for Phone {
    fn from_raw(raw: &Value) -> DbResult<Self> {
        let phone = Self {
            fields: FieldStore::new(PHONE_SCHEMA),
        };
        phone.fields.load_raw(raw_object(raw, "Phone")?)?;
        Ok(phone)
    }
}

const NAME: Field<String> = Field::new("Name");
const AGE: Field<i32> = Field::new("Age");
const STATUS: Field<Status> = Field::new("Status");
const NICKNAME: Field<Option<String>> = Field::new("Nickname");
static CONTACT_SCHEMA: &[FieldSpec] = &[NAME.spec(), AGE.spec(), STATUS.spec(), NICKNAME.spec()];

const ADDRESS: &str = "Address";
const PHONES: &str = "Phones";

/// Contact record
pub struct Contact {
    fields: FieldStore,
    address: Owned<Address>,
    phones: OwnedMap<String, Phone>,
}

impl Contact {
    /// Contact with a fresh identifier and the given name
    pub fn new(name: impl Into<String>) -> Self {
        let fields = FieldStore::new(CONTACT_SCHEMA);
        let address = Owned::new(&fields, ADDRESS, Address::new());
        let phones = OwnedMap::new(&fields, PHONES);
        let contact = Self {
            fields,
            address,
            phones,
        };
        let _ = NAME.set_with(&contact.fields, name.into(), SetOptions::silent());
        contact
    }

    /// Name
    pub fn name(&self) -> String {
        NAME.get(&self.fields)
    }

    /// Change the name
    pub fn set_name(&self, value: impl Into<String>) -> DbResult<bool> {
        NAME.set(&self.fields, value.into())
    }

    /// Age
    pub fn age(&self) -> i32 {
        AGE.get(&self.fields)
    }

    /// Change the age
    pub fn set_age(&self, value: i32) -> DbResult<bool> {
        AGE.set(&self.fields, value)
    }

    /// Change the age without recording the edit for undo
    pub fn set_age_untracked(&self, value: i32) -> DbResult<bool> {
        AGE.set_with(&self.fields, value, SetOptions::not_undoable())
    }

    /// Status
    pub fn status(&self) -> Status {
        STATUS.get(&self.fields)
    }

    /// Change the status
    pub fn set_status(&self, value: Status) -> DbResult<bool> {
        STATUS.set(&self.fields, value)
    }

    /// Nickname
    pub fn nickname(&self) -> Option<String> {
        NICKNAME.get(&self.fields)
    }

    /// Change the nickname
    pub fn set_nickname(&self, value: Option<String>) -> DbResult<bool> {
        NICKNAME.set(&self.fields, value)
    }

    /// Owned address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Owned phone entries keyed by label
    pub fn phones(&self) -> &OwnedMap<String, Phone> {
        &self.phones
    }
}

impl TrackedObject for Contact {
    fn fields(&self) -> &FieldStore {
        &self.fields
    }

    fn owned(&self, field: &str, key: Option<&str>) -> DbResult<Option<Arc<dyn TrackedObject>>> {
        match (field, key) {
            (ADDRESS, None) => Ok(Some(self.address.as_tracked())),
            (PHONES, Some(key)) => Ok(self
                .phones
                .get_by_text(key)?
                .map(|phone| phone as Arc<dyn TrackedObject>)),
            _ => Ok(None),
        }
    }

    fn to_raw(&self) -> Value {
        let mut raw = self.fields.to_raw();
        raw.insert(ADDRESS.to_string(), self.address.to_raw());
        raw.insert(PHONES.to_string(), self.phones.to_raw());
        Value::Object(raw)
    }
}

impl Record for Contact {
    fn from_raw(raw: &Value) -> DbResult<Self> {
        let raw = raw_object(raw, "Contact")?;
        let fields = FieldStore::new(CONTACT_SCHEMA);
        fields.load_raw(raw)?;
        let address = Owned::from_raw(&fields, ADDRESS, raw)?;
        let phones = OwnedMap::from_raw(&fields, PHONES, raw)?;
        Ok(Self {
            fields,
            address,
            phones,
        })
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.identifier())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ChangeEvent;
    use crate::path::FieldPath;
    use parking_lot::Mutex;

    #[test]
    fn test_nested_and_dictionary_paths() {
        let contact = Contact::new("Ann");
        contact.phones().insert("home".to_string(), Phone::new("111"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        contact.subscribe(Arc::new(move |event: &ChangeEvent| {
            sink.lock().push(event.field.clone());
            Ok(())
        }));

        contact.address().set_first_line("1 Main St").unwrap();
        contact
            .phones()
            .get(&"home".to_string())
            .unwrap()
            .set_number("222")
            .unwrap();

        assert_eq!(
            seen.lock().as_slice(),
            &["Address.FirstLine".to_string(), "Phones[home].Number".to_string()]
        );
    }

    #[test]
    fn test_path_assign_coerces_through_owned_objects() {
        let contact = Contact::new("Ann");
        contact.phones().insert("work".to_string(), Phone::new("1"));

        let path = FieldPath::parse("Phones[work].Number").unwrap();
        path.assign(&contact, serde_json::json!(555), SetOptions::default())
            .unwrap();
        assert_eq!(contact.phones().get(&"work".to_string()).unwrap().number(), "555");

        FieldPath::parse("Status")
            .unwrap()
            .assign(&contact, serde_json::json!("Away"), SetOptions::default())
            .unwrap();
        assert_eq!(contact.status(), Status::Away);

        FieldPath::parse("Nickname")
            .unwrap()
            .assign(&contact, Value::Null, SetOptions::default())
            .unwrap();
        assert_eq!(contact.nickname(), None);

        let missing = FieldPath::parse("Phones[cell].Number").unwrap();
        assert!(missing.assign(&contact, serde_json::json!("9"), SetOptions::default()).is_err());
    }

    #[test]
    fn test_raw_snapshot_keeps_owned_objects() {
        let contact = Contact::new("Ann");
        contact.set_age(40).unwrap();
        contact.set_nickname(Some("A".to_string())).unwrap();
        contact.address().set_city("Oslo").unwrap();
        contact.phones().insert("home".to_string(), Phone::new("111"));

        let copy = Contact::from_raw(&contact.to_raw()).unwrap();
        assert_eq!(copy.identifier(), contact.identifier());
        assert_eq!(copy.age(), 40);
        assert_eq!(copy.nickname(), Some("A".to_string()));
        assert_eq!(copy.address().city(), "Oslo");
        assert_eq!(copy.phones().keys(), vec!["home".to_string()]);
    }
}
