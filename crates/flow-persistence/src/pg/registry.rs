use chrono::{DateTime, Utc};
use diesel::prelude::*;
use flow_core::stack::RegistryStore;
use flow_core::{Stack, StackComponent, StorageError};
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use super::{decode, with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::{active_stack, stack_components, stacks};

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = stack_components)]
struct ComponentRow<'a> {
    id: Uuid,
    name: &'a str,
    flavor: String,
    body: Value,
    created_at: DateTime<Utc>,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = stacks)]
struct StackRow<'a> {
    id: Uuid,
    name: &'a str,
    body: Value,
    created_at: DateTime<Utc>,
}

/// Registry durable de componentes, stacks y stack activo.
pub struct PgRegistryStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgRegistryStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> RegistryStore for PgRegistryStore<P> {
    fn save_component(&self, component: &StackComponent) -> Result<(), StorageError> {
        let row = ComponentRow { id: component.id,
                                 name: &component.name,
                                 flavor: component.flavor.to_string(),
                                 body: serde_json::to_value(component).map_err(PersistenceError::from)?,
                                 created_at: component.created_at };
        with_retry("save_component", || {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(stack_components::table).values(&row)
                                                         .on_conflict(stack_components::id)
                                                         .do_update()
                                                         .set(&row)
                                                         .execute(&mut conn)?;
            Ok(())
        })?;
        debug!("component `{}` persisted", component.name);
        Ok(())
    }

    fn load_components(&self) -> Result<Vec<StackComponent>, StorageError> {
        let bodies: Vec<Value> = with_retry("load_components", || {
            let mut conn = self.provider.connection()?;
            Ok(stack_components::table.select(stack_components::body)
                                      .order((stack_components::created_at.asc(), stack_components::id.asc()))
                                      .load(&mut conn)?)
        })?;
        Ok(bodies.into_iter().map(decode).collect::<Result<_, _>>()?)
    }

    fn save_stack(&self, stack: &Stack) -> Result<(), StorageError> {
        let row = StackRow { id: stack.id,
                             name: &stack.name,
                             body: serde_json::to_value(stack).map_err(PersistenceError::from)?,
                             created_at: stack.created_at };
        with_retry("save_stack", || {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(stacks::table).values(&row)
                                              .on_conflict(stacks::id)
                                              .do_update()
                                              .set(&row)
                                              .execute(&mut conn)?;
            Ok(())
        })?;
        debug!("stack `{}` persisted", stack.name);
        Ok(())
    }

    fn load_stacks(&self) -> Result<Vec<Stack>, StorageError> {
        let bodies: Vec<Value> = with_retry("load_stacks", || {
            let mut conn = self.provider.connection()?;
            Ok(stacks::table.select(stacks::body)
                            .order((stacks::created_at.asc(), stacks::id.asc()))
                            .load(&mut conn)?)
        })?;
        Ok(bodies.into_iter().map(decode).collect::<Result<_, _>>()?)
    }

    fn set_active_stack(&self, stack_id: Option<Uuid>) -> Result<(), StorageError> {
        with_retry("set_active_stack", || {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(active_stack::table).values((active_stack::singleton.eq(true),
                                                             active_stack::stack_id.eq(stack_id)))
                                                    .on_conflict(active_stack::singleton)
                                                    .do_update()
                                                    .set(active_stack::stack_id.eq(stack_id))
                                                    .execute(&mut conn)?;
            Ok(())
        })?;
        Ok(())
    }

    fn active_stack(&self) -> Result<Option<Uuid>, StorageError> {
        let current: Option<Option<Uuid>> = with_retry("active_stack", || {
            let mut conn = self.provider.connection()?;
            Ok(active_stack::table.select(active_stack::stack_id)
                                  .first::<Option<Uuid>>(&mut conn)
                                  .optional()?)
        })?;
        Ok(current.flatten())
    }
}
