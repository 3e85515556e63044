use crate::schema::users;
use crate::schema::users::dsl::*;
use crate::{lock_db_write, lock_db_read};
use diesel::sqlite::SqliteConnection;
use diesel::prelude::*;
use regex::Regex;
use rocket::request;
use rocket::http::Status;
use serde::{Serialize, Deserialize};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Debug, PartialEq)]
pub enum UserOpError {
    // Rejected input, e.g. a malformed email
    Invalid(String),
    NotFound,
    // Bad credentials or token
    Denied(String),
    Internal(String)
}

impl From<&str> for UserOpError {
    fn from(s: &str) -> UserOpError {
        UserOpError::Internal(s.into())
    }
}

impl From<diesel::result::Error> for UserOpError {
    fn from(e: diesel::result::Error) -> UserOpError {
        tracing::error!("user query failed: {}", e);
        UserOpError::Internal("Database error".into())
    }
}

// Password should ALWAYS be hashed
#[derive(Debug)]
pub struct Password(String);

impl Password {
    fn new(passwd: &str) -> Result<Password, UserOpError> {
        let params = scrypt::ScryptParams::new(11, 8, 1)
            .map_err(|_| UserOpError::from("Invalid scrypt parameters"))?;
        scrypt::scrypt_simple(passwd, &params)
            .map(Password)
            .map_err(|_| "Failed to hash password".into())
    }
}

impl PartialEq<&str> for Password {
    fn eq(&self, other: &&str) -> bool {
        scrypt::scrypt_check(*other, &self.0).is_ok()
    }
}

// Convert itself to a hash String for db operations
impl From<Password> for String {
    fn from(p: Password) -> String {
        p.0
    }
}

// A raw User returned from database
// we need to wrap the password in the Password type
#[derive(Queryable)]
struct UserQuery {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool
}

impl From<UserQuery> for User {
    fn from(q: UserQuery) -> User {
        User {
            id: q.id,
            name: q.name,
            email: q.email,
            // Already the hashed value from db
            password: Password(q.password),
            is_admin: q.is_admin
        }
    }
}

#[derive(Debug)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password: Password,
    pub is_admin: bool
}

// The public face of a user, as shown next to the items they own
#[derive(Queryable, Serialize, Clone, Debug, PartialEq)]
pub struct Owner {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub is_admin: bool
}

impl From<&User> for Owner {
    fn from(u: &User) -> Owner {
        Owner {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            is_admin: u.is_admin
        }
    }
}

#[derive(Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub is_admin: bool
}

#[derive(Insertable)]
#[table_name="users"]
struct NewUserInsert {
    name: String,
    email: String,
    password: String,
    is_admin: bool
}

// Columns safe to hand out to clients
type OwnerColumns = (users::id, users::name, users::email, users::is_admin);
pub const OWNER_COLUMNS: OwnerColumns = (users::id, users::name, users::email, users::is_admin);

// Callers must already hold DB_LOCK
pub(crate) fn id_exists(db: &SqliteConnection, user_id: i32) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(users.find(user_id))).get_result(db)
}

// Callers must already hold DB_LOCK
fn by_email(db: &SqliteConnection, user_email: &str) -> QueryResult<Option<UserQuery>> {
    users.filter(email.eq(user_email))
        .first::<UserQuery>(db)
        .optional()
}

impl User {
    pub fn create(db: &SqliteConnection, new_user: &NewUser) -> Result<User, UserOpError> {
        if new_user.name.trim().is_empty() {
            return Err(UserOpError::Invalid("Name must not be empty".into()));
        }
        if !EMAIL_RE.is_match(&new_user.email) {
            return Err(UserOpError::Invalid("Invalid email address".into()));
        }
        if new_user.password.is_empty() {
            return Err(UserOpError::Invalid("Password must not be empty".into()));
        }

        let hashed: String = Password::new(&new_user.password)?.into();

        // The duplicate check and the insert must not interleave with another registration
        let _lock = lock_db_write!()?;
        if by_email(db, &new_user.email)?.is_some() {
            return Err(UserOpError::Invalid("User already registered".into()));
        }
        diesel::insert_into(users::table)
            .values(NewUserInsert {
                name: new_user.name.clone(),
                email: new_user.email.clone(),
                password: hashed,
                is_admin: new_user.is_admin
            })
            .execute(db)?;
        tracing::info!("registered user {}", new_user.email);

        by_email(db, &new_user.email)?
            .map(Into::into)
            .ok_or(UserOpError::NotFound)
    }

    pub fn find_user_by_email(db: &SqliteConnection, user_email: &str) -> Result<User, UserOpError> {
        let _lock = lock_db_read!()?;
        by_email(db, user_email)?
            .map(Into::into)
            .ok_or(UserOpError::NotFound)
    }

    pub fn find_user_by_id(db: &SqliteConnection, user_id: i32) -> Result<User, UserOpError> {
        let _lock = lock_db_read!()?;
        users.find(user_id)
            .first::<UserQuery>(db)
            .optional()?
            .map(Into::into)
            .ok_or(UserOpError::NotFound)
    }

    pub fn find_user_by_token(db: &SqliteConnection, token: &str) -> Result<User, UserOpError> {
        crate::tokens::Token::find_token_by_id(db, token)
            .ok_or_else(|| UserOpError::Denied("Invalid token".into()))
            .and_then(|uid| Self::find_user_by_id(db, uid))
    }

    // Everyone who can own an item, for the owner picker
    pub fn list_owners(db: &SqliteConnection) -> Result<Vec<Owner>, UserOpError> {
        let _lock = lock_db_read!()?;
        Ok(users.select(OWNER_COLUMNS)
            .order((name.asc(), id.asc()))
            .load::<Owner>(db)?)
    }

    // Removes the user along with every item and token they own
    pub fn delete(db: &SqliteConnection, user_id: i32) -> Result<(), UserOpError> {
        let _lock = lock_db_write!()?;
        let deleted = diesel::delete(users.find(user_id)).execute(db)?;
        if deleted == 0 {
            Err(UserOpError::NotFound)
        } else {
            tracing::info!("deleted user {}", user_id);
            Ok(())
        }
    }

    // Issue a bearer token for the current user if password matches
    pub fn create_token(&self, db: &SqliteConnection, passwd: &str) -> Result<String, UserOpError> {
        if self.password != passwd {
            Err(UserOpError::Denied("Password mismatch".into()))
        } else {
            crate::tokens::Token::create_token(db, self.id)
                .ok_or_else(|| "Failed to generate token".into())
        }
    }
}

// Implement request guard for User type
// This is intended for protecting authorized endpoints
impl<'a, 'r> request::FromRequest<'a, 'r> for User {
    type Error = UserOpError;

    fn from_request(request: &'a request::Request<'r>) -> request::Outcome<Self, Self::Error> {
        let token = match request.headers().get_one("authorization") {
            None => return request::Outcome::Failure((Status::Unauthorized, UserOpError::Denied("Token missing".into()))),
            Some(token) => token
        };
        if !token.starts_with("Bearer ") {
            return request::Outcome::Failure((Status::Unauthorized, UserOpError::Denied("Malformed Token".into())));
        }

        let db = match request.guard::<crate::DbConn>() {
            request::Outcome::Success(db) => db,
            _ => return request::Outcome::Failure((Status::ServiceUnavailable, "Database unavailable".into()))
        };

        match Self::find_user_by_token(&db, &token[7..]) {
            Ok(u) => request::Outcome::Success(u),
            Err(UserOpError::Internal(e)) => request::Outcome::Failure((Status::InternalServerError, UserOpError::Internal(e))),
            Err(_) => request::Outcome::Failure((Status::Unauthorized, UserOpError::Denied("Invalid token".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EMAIL_RE;

    #[test]
    fn email_shape() {
        assert!(EMAIL_RE.is_match("alice@example.com"));
        assert!(!EMAIL_RE.is_match("alice.example.com"));
        assert!(!EMAIL_RE.is_match("alice@example"));
        assert!(!EMAIL_RE.is_match("al ice@example.com"));
    }
}
