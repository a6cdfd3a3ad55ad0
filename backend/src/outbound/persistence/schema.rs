//! Diesel table definitions for the schema registry.
//!
//! These definitions must match the registry migrations exactly. Dynamic
//! tables are created at runtime and have no entry here; they are reached
//! through `sql_query` with the statements in `sql.rs`.

diesel::table! {
    /// Registered dynamic tables.
    ///
    /// `name` is the physical table name and is unique. At most one row has
    /// `is_default` set.
    table_definitions (id) {
        id -> Int4,
        name -> Varchar,
        display_name -> Varchar,
        description -> Nullable<Text>,
        is_default -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Declared columns of each registered table, cascade-deleted with it.
    column_definitions (id) {
        id -> Int4,
        table_id -> Int4,
        name -> Varchar,
        display_name -> Varchar,
        data_type -> Varchar,
        is_required -> Bool,
        is_summable -> Bool,
        /// Position of the column in display order.
        #[sql_name = "order"]
        display_order -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(column_definitions -> table_definitions (table_id));
diesel::allow_tables_to_appear_in_same_query!(table_definitions, column_definitions);
