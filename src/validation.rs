use chrono::NaiveDate;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::TryFrom;

pub const NAME_MAX_CHARS: usize = 255;
const DATE_FORMAT: &str = "%Y-%m-%d";

// Fields of an item as submitted by a client.
// Everything is loosely typed here because the dashboard posts numbers
// as strings, and a wrong type has to come back as a field error rather
// than a rejected body.
#[derive(Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct ItemForm {
    pub name: Option<Value>,
    pub owner_id: Option<Value>,
    pub quantity: Option<Value>,
    pub date_deposited: Option<Value>,
    pub date_retrieved: Option<Value>
}

// An item that passed every rule, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedItem {
    pub name: String,
    pub owner_id: i32,
    pub quantity: i32,
    pub date_deposited: NaiveDate,
    pub date_retrieved: Option<NaiveDate>
}

// field name -> message
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
    pub fn add(&mut self, field: &'static str, msg: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| msg.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}

#[derive(Debug)]
pub enum FormError<E> {
    Invalid(ValidationErrors),
    // The owner lookup itself failed
    Lookup(E)
}

// Blank strings count as missing, like a cleared form input
fn present(v: &Option<Value>) -> Option<&Value> {
    match v {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v)
    }
}

// Whole-valued floats such as 3.0 count as integers
fn as_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None
    }
}

fn as_date(v: &Value) -> Option<NaiveDate> {
    match v {
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok(),
        _ => None
    }
}

impl ItemForm {
    // Check every field and collect all violations at once.
    // `owner_exists` is only consulted for a well-formed owner id.
    pub fn validate<F, E>(&self, owner_exists: F) -> Result<ValidatedItem, FormError<E>>
    where
        F: FnOnce(i32) -> Result<bool, E>
    {
        let mut errors = ValidationErrors::default();

        let name = match present(&self.name) {
            None => {
                errors.add("name", "The name field is required.");
                None
            },
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.chars().count() > NAME_MAX_CHARS {
                    errors.add("name", format!(
                        "The name field must not be greater than {} characters.", NAME_MAX_CHARS));
                    None
                } else {
                    Some(s.to_string())
                }
            },
            Some(_) => {
                errors.add("name", "The name field must be a string.");
                None
            }
        };

        let owner_id = match present(&self.owner_id) {
            None => {
                errors.add("owner_id", "The owner id field is required.");
                None
            },
            Some(v) => {
                let uid = as_integer(v).and_then(|i| i32::try_from(i).ok());
                let found = match uid {
                    Some(uid) => owner_exists(uid).map_err(FormError::Lookup)?,
                    None => false
                };
                if !found {
                    errors.add("owner_id", "The selected owner id is invalid.");
                }
                uid.filter(|_| found)
            }
        };

        let quantity = match present(&self.quantity) {
            None => {
                errors.add("quantity", "The quantity field is required.");
                None
            },
            Some(v) => match as_integer(v) {
                None => {
                    errors.add("quantity", "The quantity field must be an integer.");
                    None
                },
                Some(q) if q < 1 => {
                    errors.add("quantity", "The quantity field must be at least 1.");
                    None
                },
                Some(q) => match i32::try_from(q) {
                    Ok(q) => Some(q),
                    Err(_) => {
                        errors.add("quantity", format!(
                            "The quantity field must not be greater than {}.", i32::MAX));
                        None
                    }
                }
            }
        };

        let date_deposited = match present(&self.date_deposited) {
            None => {
                errors.add("date_deposited", "The date deposited field is required.");
                None
            },
            Some(v) => {
                let d = as_date(v);
                if d.is_none() {
                    errors.add("date_deposited", "The date deposited field must be a valid date.");
                }
                d
            }
        };

        let date_retrieved = match present(&self.date_retrieved) {
            None => None,
            Some(v) => match as_date(v) {
                None => {
                    errors.add("date_retrieved", "The date retrieved field must be a valid date.");
                    None
                },
                Some(d) => {
                    // Nothing to compare against when the deposit date is unusable
                    if date_deposited.map_or(false, |dep| d < dep) {
                        errors.add("date_retrieved",
                            "The date retrieved field must be a date after or equal to date deposited.");
                    }
                    Some(d)
                }
            }
        };

        match (name, owner_id, quantity, date_deposited) {
            (Some(name), Some(owner_id), Some(quantity), Some(date_deposited)) if errors.is_empty() =>
                Ok(ValidatedItem {
                    name,
                    owner_id,
                    quantity,
                    date_deposited,
                    date_retrieved
                }),
            _ => Err(FormError::Invalid(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(v: Value) -> ItemForm {
        serde_json::from_value(v).unwrap()
    }

    fn only_owner_1(uid: i32) -> Result<bool, ()> {
        Ok(uid == 1)
    }

    fn errors_of(f: ItemForm) -> ValidationErrors {
        match f.validate(only_owner_1) {
            Err(FormError::Invalid(e)) => e,
            other => panic!("expected validation errors, got {:?}", other)
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn accepts_valid_item() {
        let item = form(json!({
            "name": "Box A",
            "owner_id": 1,
            "quantity": 3,
            "date_deposited": "2024-01-01"
        })).validate(only_owner_1).unwrap();
        assert_eq!(item, ValidatedItem {
            name: "Box A".into(),
            owner_id: 1,
            quantity: 3,
            date_deposited: date("2024-01-01"),
            date_retrieved: None
        });
    }

    #[test]
    fn accepts_numbers_as_strings() {
        let item = form(json!({
            "name": "  Crate  ",
            "owner_id": "1",
            "quantity": "12",
            "date_deposited": "2024-01-01",
            "date_retrieved": "2024-01-01"
        })).validate(only_owner_1).unwrap();
        assert_eq!(item.name, "Crate");
        assert_eq!(item.quantity, 12);
        assert_eq!(item.date_retrieved, Some(date("2024-01-01")));
    }

    #[test]
    fn empty_retrieval_date_is_absent() {
        let item = form(json!({
            "name": "Box",
            "owner_id": 1,
            "quantity": 1,
            "date_deposited": "2024-01-01",
            "date_retrieved": ""
        })).validate(only_owner_1).unwrap();
        assert_eq!(item.date_retrieved, None);
    }

    #[test]
    fn reports_every_missing_field() {
        let e = errors_of(ItemForm::default());
        assert_eq!(e.fields().collect::<Vec<_>>(),
            vec!["date_deposited", "name", "owner_id", "quantity"]);
        assert_eq!(e.get("name"), Some("The name field is required."));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        for q in &[json!(0), json!(-4), json!("0")] {
            let e = errors_of(form(json!({
                "name": "Box",
                "owner_id": 1,
                "quantity": q,
                "date_deposited": "2024-01-01"
            })));
            assert_eq!(e.len(), 1);
            assert_eq!(e.get("quantity"), Some("The quantity field must be at least 1."));
        }
    }

    #[test]
    fn rejects_non_integer_quantity() {
        let e = errors_of(form(json!({
            "name": "Box",
            "owner_id": 1,
            "quantity": 2.5,
            "date_deposited": "2024-01-01"
        })));
        assert_eq!(e.get("quantity"), Some("The quantity field must be an integer."));

        let e = errors_of(form(json!({
            "name": "Box",
            "owner_id": 1,
            "quantity": 3_000_000_000i64,
            "date_deposited": "2024-01-01"
        })));
        assert_eq!(e.get("quantity"), Some("The quantity field must not be greater than 2147483647."));
    }

    #[test]
    fn accepts_whole_floats() {
        let item = form(json!({
            "name": "Box",
            "owner_id": 1.0,
            "quantity": 3.0,
            "date_deposited": "2024-01-01"
        })).validate(only_owner_1).unwrap();
        assert_eq!(item.owner_id, 1);
        assert_eq!(item.quantity, 3);
    }

    #[test]
    fn rejects_retrieval_before_deposit() {
        let e = errors_of(form(json!({
            "name": "Box",
            "owner_id": 1,
            "quantity": 1,
            "date_deposited": "2024-01-05",
            "date_retrieved": "2024-01-01"
        })));
        assert_eq!(e.len(), 1);
        assert_eq!(e.get("date_retrieved"),
            Some("The date retrieved field must be a date after or equal to date deposited."));
    }

    #[test]
    fn skips_ordering_when_deposit_is_bad() {
        let e = errors_of(form(json!({
            "name": "Box",
            "owner_id": 1,
            "quantity": 1,
            "date_deposited": "yesterday",
            "date_retrieved": "2024-01-01"
        })));
        assert_eq!(e.len(), 1);
        assert_eq!(e.get("date_deposited"), Some("The date deposited field must be a valid date."));
    }

    #[test]
    fn rejects_unknown_owner() {
        for owner in &[json!(2), json!("abc"), json!(99_999_999_999i64)] {
            let e = errors_of(form(json!({
                "name": "Box",
                "owner_id": owner,
                "quantity": 1,
                "date_deposited": "2024-01-01"
            })));
            assert_eq!(e.get("owner_id"), Some("The selected owner id is invalid."));
        }
    }

    #[test]
    fn name_length_counts_characters() {
        let ok = "é".repeat(NAME_MAX_CHARS);
        assert!(form(json!({
            "name": ok,
            "owner_id": 1,
            "quantity": 1,
            "date_deposited": "2024-01-01"
        })).validate(only_owner_1).is_ok());

        let e = errors_of(form(json!({
            "name": "x".repeat(NAME_MAX_CHARS + 1),
            "owner_id": 1,
            "quantity": 1,
            "date_deposited": "2024-01-01"
        })));
        assert_eq!(e.get("name"), Some("The name field must not be greater than 255 characters."));
    }

    #[test]
    fn collects_all_violations_together() {
        let e = errors_of(form(json!({
            "name": 42,
            "owner_id": 7,
            "quantity": 0,
            "date_deposited": "2024-02-01",
            "date_retrieved": "2024-01-01"
        })));
        assert_eq!(e.len(), 4);
        assert_eq!(e.get("name"), Some("The name field must be a string."));
    }

    #[test]
    fn lookup_failure_is_not_a_field_error() {
        let res = form(json!({
            "name": "Box",
            "owner_id": 1,
            "quantity": 1,
            "date_deposited": "2024-01-01"
        })).validate(|_| Err("db down"));
        match res {
            Err(FormError::Lookup(e)) => assert_eq!(e, "db down"),
            other => panic!("unexpected {:?}", other)
        }
    }
}
