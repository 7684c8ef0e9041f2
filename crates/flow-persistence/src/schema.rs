//! Esquema Diesel de las tablas del motor. Reemplazable con `diesel print-schema`.

diesel::table! {
    flow_machines (id) {
        id -> BigInt,
        category -> Text,
        name -> Text,
        submitter_name -> Text,
        submitter_edit_fields -> Jsonb,
        submitter_confirm_required -> Bool,
        submitter_confirm_edit_fields -> Jsonb,
        levels -> Jsonb,
        levels_hash -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    flow_decisions (id) {
        id -> BigInt,
        category -> Text,
        uuid -> Text,
        revision -> Integer,
        machine_id -> BigInt,
        level_index -> Integer,
        actor_role_id -> Nullable<BigInt>,
        actor_user_id -> Nullable<BigInt>,
        action -> Text,
        opinion -> Nullable<Text>,
        prev_detail -> Jsonb,
        detail -> Jsonb,
        submitter_user_id -> BigInt,
        submitter_role_id -> Nullable<BigInt>,
        levels_hash -> Text,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(flow_decisions, flow_machines,);
