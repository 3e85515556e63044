use crate::DbConn;
use crate::user::{self, UserOpError};
use crate::item::{self, ItemOpError};
use crate::validation::{ItemForm, ValidationErrors};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket_contrib::json::Json;
use serde::{Serialize, Deserialize};
use std::vec::Vec;

pub fn routes() -> impl Into<Vec<rocket::Route>> {
    routes![
        auth,
        auth_sign_in,
        auth_ping,
        dashboard,
        items_create,
        items_update,
        items_delete
    ]
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![
        bad_request,
        unauthorized,
        not_found,
        unprocessable,
        internal_error
    ]
}

#[derive(Serialize)]
#[serde(untagged)]
enum Response<T: Serialize> {
    Error {
        errors: Vec<String>
    },
    Invalid {
        message: String,
        errors: ValidationErrors
    },
    Success(T)
}

// Some shorthands
type JsonResp<T> = Json<Response<T>>;

fn success_resp<T: Serialize>(status: Status, resp: T) -> Custom<JsonResp<T>> {
    Custom(status, Json(Response::Success(resp)))
}

fn error_resp<T: Serialize>(status: Status, errors: Vec<String>) -> Custom<JsonResp<T>> {
    Custom(status, Json(Response::Error {
        errors
    }))
}

fn item_error_resp<T: Serialize>(e: ItemOpError) -> Custom<JsonResp<T>> {
    match e {
        ItemOpError::Validation(errors) => {
            tracing::debug!("item rejected on {:?}", errors.fields().collect::<Vec<_>>());
            Custom(Status::UnprocessableEntity, Json(Response::Invalid {
                message: "The given data was invalid.".into(),
                errors
            }))
        },
        ItemOpError::NotFound =>
            error_resp(Status::NotFound, vec!["Item not found".into()]),
        ItemOpError::Database(e) =>
            error_resp(Status::InternalServerError, vec![e])
    }
}

fn user_error_resp<T: Serialize>(e: UserOpError) -> Custom<JsonResp<T>> {
    match e {
        UserOpError::Invalid(e) => error_resp(Status::BadRequest, vec![e]),
        UserOpError::NotFound => error_resp(Status::NotFound, vec!["No matching user found".into()]),
        UserOpError::Denied(e) => error_resp(Status::Unauthorized, vec![e]),
        UserOpError::Internal(e) => error_resp(Status::InternalServerError, vec![e])
    }
}

#[derive(Serialize)]
struct AuthResult {
    user: user::Owner,
    token: String
}

#[post("/auth", format = "json", data = "<new_user>")]
fn auth(db: DbConn, new_user: Json<user::NewUser>) -> Custom<JsonResp<AuthResult>> {
    match user::User::create(&db, &new_user) {
        Ok(_) => _sign_in(db, &new_user.email, &new_user.password),
        Err(e) => user_error_resp(e)
    }
}

#[derive(Deserialize)]
struct SignInParams {
    email: String,
    password: String
}

#[post("/auth/sign_in", format = "json", data = "<params>")]
fn auth_sign_in(db: DbConn, params: Json<SignInParams>) -> Custom<JsonResp<AuthResult>> {
    _sign_in(db, &params.email, &params.password)
}

// Shared logic for all interfaces that needs to do an automatic sign-in
fn _sign_in(db: DbConn, mail: &str, passwd: &str) -> Custom<JsonResp<AuthResult>> {
    let res = user::User::find_user_by_email(&db, mail)
                .and_then(|u| u.create_token(&db, passwd)
                                .map(|token| (user::Owner::from(&u), token)));
    match res {
        Ok((user, token)) => success_resp(Status::Ok, AuthResult {
            user,
            token
        }),
        // Don't tell apart unknown emails from wrong passwords
        Err(UserOpError::NotFound) | Err(UserOpError::Denied(_)) =>
            error_resp(Status::Unauthorized, vec!["Invalid email or password".into()]),
        Err(e) => user_error_resp(e)
    }
}

// For testing the User request guard
#[get("/auth/ping")]
fn auth_ping(u: user::User) -> Custom<JsonResp<String>> {
    success_resp(Status::Ok, u.email)
}

#[derive(Serialize)]
struct DashboardResp {
    items: Vec<item::ItemView>,
    users: Vec<user::Owner>,
    counts: item::ItemCounts
}

#[get("/dashboard?<search>")]
fn dashboard(db: DbConn, _u: user::User, search: Option<String>) -> Custom<JsonResp<DashboardResp>> {
    let items = match item::Item::list(&db, search.as_ref().map(String::as_str)) {
        Ok(items) => items,
        Err(e) => return item_error_resp(e)
    };
    let users = match user::User::list_owners(&db) {
        Ok(users) => users,
        Err(e) => return user_error_resp(e)
    };
    let counts = item::ItemCounts::tally(&items);

    success_resp(Status::Ok, DashboardResp {
        items,
        users,
        counts
    })
}

// The dashboard shows `message` as its success banner
#[derive(Serialize)]
struct ItemResp {
    message: &'static str,
    item: item::ItemView
}

#[derive(Serialize)]
struct MessageResp {
    message: &'static str
}

#[post("/items", format = "json", data = "<form>")]
fn items_create(db: DbConn, u: user::User, form: Json<ItemForm>) -> Custom<JsonResp<ItemResp>> {
    match item::Item::create(&db, &form) {
        Ok(it) => {
            tracing::info!("{} added item {}", u.email, it.item.id);
            success_resp(Status::Created, ItemResp {
                message: "Item added successfully!",
                item: it
            })
        },
        Err(e) => item_error_resp(e)
    }
}

#[patch("/items/<id>", format = "json", data = "<form>")]
fn items_update(db: DbConn, u: user::User, id: i64, form: Json<ItemForm>) -> Custom<JsonResp<ItemResp>> {
    match item::Item::update(&db, id, &form) {
        Ok(it) => {
            tracing::info!("{} updated item {}", u.email, id);
            success_resp(Status::Ok, ItemResp {
                message: "Item updated successfully!",
                item: it
            })
        },
        Err(e) => item_error_resp(e)
    }
}

#[delete("/items/<id>")]
fn items_delete(db: DbConn, u: user::User, id: i64) -> Custom<JsonResp<MessageResp>> {
    match item::Item::delete(&db, id) {
        Ok(()) => {
            tracing::info!("{} deleted item {}", u.email, id);
            success_resp(Status::Ok, MessageResp {
                message: "Item deleted successfully!"
            })
        },
        Err(e) => item_error_resp(e)
    }
}

// Rocket answers guard and body failures with HTML by default;
// keep every error in the same JSON shape instead
fn catch_resp(msg: &str) -> Json<Response<()>> {
    Json(Response::Error {
        errors: vec![msg.into()]
    })
}

#[catch(400)]
fn bad_request() -> Json<Response<()>> {
    catch_resp("Bad request")
}

#[catch(401)]
fn unauthorized() -> Json<Response<()>> {
    catch_resp("Unauthorized")
}

#[catch(404)]
fn not_found() -> Json<Response<()>> {
    catch_resp("Not found")
}

#[catch(422)]
fn unprocessable() -> Json<Response<()>> {
    catch_resp("Malformed request body")
}

#[catch(500)]
fn internal_error() -> Json<Response<()>> {
    catch_resp("Internal server error")
}
