table! {
    items (id) {
        id -> BigInt, // Forced, diesel does not support intepreting Integer as i64
        name -> Text,
        owner_id -> Integer,
        quantity -> Integer,
        date_deposited -> Date,
        date_retrieved -> Nullable<Date>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    tokens (id) {
        id -> Text,
        uid -> Integer,
        timestamp -> Nullable<Timestamp>,
    }
}

table! {
    users (id) {
        id -> Integer,
        name -> Text,
        email -> Text,
        password -> Text,
        is_admin -> Bool,
    }
}

joinable!(items -> users (owner_id));
joinable!(tokens -> users (uid));

allow_tables_to_appear_in_same_query!(
    items,
    tokens,
    users,
);
