use crate::schema::{items, users};
use crate::user::{self, Owner, OWNER_COLUMNS};
use crate::validation::{FormError, ItemForm, ValidatedItem, ValidationErrors};
use crate::{lock_db_write, lock_db_read};
use diesel::sqlite::SqliteConnection;
use chrono::naive::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::Serialize;
use std::vec::Vec;

no_arg_sql_function!(last_insert_rowid, diesel::sql_types::BigInt);

#[derive(Debug)]
pub enum ItemOpError {
    // Nothing was written; the map says why
    Validation(ValidationErrors),
    NotFound,
    Database(String)
}

impl From<&str> for ItemOpError {
    fn from(s: &str) -> ItemOpError {
        ItemOpError::Database(s.into())
    }
}

impl From<diesel::result::Error> for ItemOpError {
    fn from(e: diesel::result::Error) -> ItemOpError {
        tracing::error!("item query failed: {}", e);
        ItemOpError::Database("Database error".into())
    }
}

impl From<FormError<diesel::result::Error>> for ItemOpError {
    fn from(e: FormError<diesel::result::Error>) -> ItemOpError {
        match e {
            FormError::Invalid(errors) => ItemOpError::Validation(errors),
            FormError::Lookup(e) => e.into()
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InStorage,
    Retrieved
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub owner_id: i32,
    pub quantity: i32,
    pub date_deposited: NaiveDate,
    pub date_retrieved: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime
}

impl Item {
    pub fn status(&self) -> ItemStatus {
        match self.date_retrieved {
            None => ItemStatus::InStorage,
            Some(_) => ItemStatus::Retrieved
        }
    }
}

// An item together with the user it belongs to, as the dashboard shows it
#[derive(Serialize, Debug, Clone)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: Item,
    pub owner: Owner,
    pub status: ItemStatus
}

impl ItemView {
    // `needle` must already be lowercased
    pub fn matches(&self, needle: &str) -> bool {
        self.item.name.to_lowercase().contains(needle)
            || self.owner.name.to_lowercase().contains(needle)
            || self.owner.email.to_lowercase().contains(needle)
    }
}

impl From<(Item, Owner)> for ItemView {
    fn from((item, owner): (Item, Owner)) -> ItemView {
        let status = item.status();
        ItemView { item, owner, status }
    }
}

#[derive(Serialize, Debug, Default, PartialEq)]
pub struct ItemCounts {
    pub total: usize,
    pub in_storage: usize,
    pub retrieved: usize
}

impl ItemCounts {
    pub fn tally(views: &[ItemView]) -> ItemCounts {
        let retrieved = views.iter()
            .filter(|v| v.status == ItemStatus::Retrieved)
            .count();
        ItemCounts {
            total: views.len(),
            in_storage: views.len() - retrieved,
            retrieved
        }
    }
}

#[derive(Insertable)]
#[table_name = "items"]
struct InsertItem {
    name: String,
    owner_id: i32,
    quantity: i32,
    date_deposited: NaiveDate,
    date_retrieved: Option<NaiveDate>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime
}

// Full-record replace: a missing retrieval date clears the column
#[derive(AsChangeset)]
#[table_name = "items"]
#[changeset_options(treat_none_as_null = "true")]
struct ReplaceItem {
    name: String,
    owner_id: i32,
    quantity: i32,
    date_deposited: NaiveDate,
    date_retrieved: Option<NaiveDate>,
    updated_at: NaiveDateTime
}

impl InsertItem {
    fn new(v: ValidatedItem, now: NaiveDateTime) -> InsertItem {
        InsertItem {
            name: v.name,
            owner_id: v.owner_id,
            quantity: v.quantity,
            date_deposited: v.date_deposited,
            date_retrieved: v.date_retrieved,
            created_at: now,
            updated_at: now
        }
    }
}

impl ReplaceItem {
    fn new(v: ValidatedItem, now: NaiveDateTime) -> ReplaceItem {
        ReplaceItem {
            name: v.name,
            owner_id: v.owner_id,
            quantity: v.quantity,
            date_deposited: v.date_deposited,
            date_retrieved: v.date_retrieved,
            updated_at: now
        }
    }
}

// The helpers below take no lock; callers must already hold DB_LOCK

fn find_view(db: &SqliteConnection, item_id: i64) -> QueryResult<Option<ItemView>> {
    items::table.inner_join(users::table)
        .filter(items::id.eq(item_id))
        .select((items::all_columns, OWNER_COLUMNS))
        .first::<(Item, Owner)>(db)
        .optional()
        .map(|row| row.map(Into::into))
}

fn item_exists(db: &SqliteConnection, item_id: i64) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(items::table.find(item_id))).get_result(db)
}

impl Item {
    // Newest first, optionally narrowed to items whose name or owner
    // (name or email) contains `search`, ignoring case
    pub fn list(db: &SqliteConnection, search: Option<&str>) -> Result<Vec<ItemView>, ItemOpError> {
        let rows = {
            let _lock = lock_db_read!()?;
            items::table.inner_join(users::table)
                .select((items::all_columns, OWNER_COLUMNS))
                .order((items::created_at.desc(), items::id.desc()))
                .load::<(Item, Owner)>(db)?
        };

        // SQLite's LIKE only folds ASCII, so the match happens here
        let needle = search.map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        Ok(rows.into_iter()
            .map(ItemView::from)
            .filter(|v| needle.as_ref().map_or(true, |n| v.matches(n)))
            .collect())
    }

    pub fn create(db: &SqliteConnection, form: &ItemForm) -> Result<ItemView, ItemOpError> {
        let _lock = lock_db_write!()?;
        let valid = form.validate(|uid| user::id_exists(db, uid))?;
        let now = chrono::Utc::now().naive_utc();

        let new_id = db.transaction::<_, diesel::result::Error, _>(|| {
            diesel::insert_into(items::table)
                .values(InsertItem::new(valid, now))
                .execute(db)?;
            diesel::select(last_insert_rowid).get_result::<i64>(db)
        })?;
        tracing::info!("created item {}", new_id);

        find_view(db, new_id)?.ok_or(ItemOpError::NotFound)
    }

    // Replaces every field of the item. A missing id wins over a bad body.
    pub fn update(db: &SqliteConnection, item_id: i64, form: &ItemForm) -> Result<ItemView, ItemOpError> {
        let _lock = lock_db_write!()?;
        if !item_exists(db, item_id)? {
            return Err(ItemOpError::NotFound);
        }
        let valid = form.validate(|uid| user::id_exists(db, uid))?;
        let now = chrono::Utc::now().naive_utc();

        diesel::update(items::table.find(item_id))
            .set(ReplaceItem::new(valid, now))
            .execute(db)?;
        tracing::info!("updated item {}", item_id);

        find_view(db, item_id)?.ok_or(ItemOpError::NotFound)
    }

    pub fn delete(db: &SqliteConnection, item_id: i64) -> Result<(), ItemOpError> {
        let _lock = lock_db_write!()?;
        let deleted = diesel::delete(items::table.find(item_id)).execute(db)?;
        if deleted == 0 {
            Err(ItemOpError::NotFound)
        } else {
            tracing::info!("deleted item {}", item_id);
            Ok(())
        }
    }
}

// Direct store lookups for the end-to-end tests
#[cfg(test)]
impl Item {
    pub fn find(db: &SqliteConnection, item_id: i64) -> Result<ItemView, ItemOpError> {
        let _lock = lock_db_read!()?;
        find_view(db, item_id)?.ok_or(ItemOpError::NotFound)
    }

    pub fn count_owned_by(db: &SqliteConnection, uid: i32) -> Result<i64, ItemOpError> {
        let _lock = lock_db_read!()?;
        Ok(items::table.filter(items::owner_id.eq(uid))
            .count()
            .get_result(db)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(retrieved: Option<&str>) -> Item {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let now = d("2024-01-01").and_hms(0, 0, 0);
        Item {
            id: 1,
            name: "Box A".into(),
            owner_id: 1,
            quantity: 3,
            date_deposited: d("2024-01-01"),
            date_retrieved: retrieved.map(d),
            created_at: now,
            updated_at: now
        }
    }

    fn owner() -> Owner {
        Owner { id: 1, name: "Alice".into(), email: "alice@example.com".into(), is_admin: false }
    }

    #[test]
    fn status_follows_retrieval_date() {
        assert_eq!(item(None).status(), ItemStatus::InStorage);
        assert_eq!(item(Some("2024-01-05")).status(), ItemStatus::Retrieved);
    }

    #[test]
    fn view_serializes_flat_with_status() {
        let v: ItemView = (item(None), owner()).into();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["name"], "Box A");
        assert_eq!(json["date_deposited"], "2024-01-01");
        assert!(json["date_retrieved"].is_null());
        assert_eq!(json["status"], "in_storage");
        assert_eq!(json["owner"]["email"], "alice@example.com");
    }

    #[test]
    fn counts_split_by_status() {
        let views: Vec<ItemView> = vec![
            (item(None), owner()).into(),
            (item(Some("2024-01-02")), owner()).into(),
            (item(None), owner()).into()
        ];
        assert_eq!(ItemCounts::tally(&views), ItemCounts { total: 3, in_storage: 2, retrieved: 1 });
    }

    #[test]
    fn matches_name_owner_and_email() {
        let v: ItemView = (item(None), owner()).into();
        assert!(v.matches("box"));
        assert!(v.matches("alice"));
        assert!(v.matches("example.com"));
        assert!(!v.matches("crate"));
    }

    #[test]
    fn matches_folds_unicode_case() {
        let mut it = item(None);
        it.name = "Écrin à bijoux".into();
        let v: ItemView = (it, owner()).into();
        assert!(v.matches("écrin"));
        assert!(v.matches("À BIJOUX".to_lowercase().as_str()));
    }
}
