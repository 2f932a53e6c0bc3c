//! Registry de componentes, validación de stacks y contexto de ejecución.

pub mod backend;
pub mod category;
pub mod component;
pub mod context;
pub mod flavor;
pub mod registry;
pub mod store;

pub use backend::{ActiveStack, BackendHandle, FlavorFactory};
pub use category::ComponentCategory;
pub use component::{Stack, StackComponent};
pub use context::FlowContext;
pub use flavor::{ComponentFlavor, ConfigField, FieldKind, FlavorKey, Locality, Requirement, LOCAL_FLAG};
pub use registry::ComponentRegistry;
pub use store::{InMemoryRegistryStore, RegistryStore};
