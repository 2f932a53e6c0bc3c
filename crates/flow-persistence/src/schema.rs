//! Esquema Diesel (escrito a mano). Reemplazable con `diesel print-schema`.

diesel::table! {
    stack_components (id) {
        id -> Uuid,
        name -> Text,
        flavor -> Text,
        body -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    stacks (id) {
        id -> Uuid,
        name -> Text,
        body -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    active_stack (singleton) {
        singleton -> Bool,
        stack_id -> Nullable<Uuid>,
    }
}

diesel::table! {
    artifact_versions (id) {
        id -> Uuid,
        run_id -> Uuid,
        step_name -> Text,
        output_name -> Text,
        cache_key -> Nullable<Text>,
        body -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    run_events (id) {
        id -> BigInt,
        run_id -> Uuid,
        seq -> BigInt,
        event_type -> Text,
        payload -> Jsonb,
        ts -> Timestamptz,
    }
}

diesel::table! {
    deployment_services (id) {
        id -> Uuid,
        pipeline -> Text,
        step -> Text,
        model -> Text,
        state -> Text,
        body -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(active_stack -> stacks (stack_id));

diesel::allow_tables_to_appear_in_same_query!(
    stack_components,
    stacks,
    active_stack,
    artifact_versions,
    run_events,
    deployment_services,
);
