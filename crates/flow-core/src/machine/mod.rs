//! Almacén de definiciones (`Machine`).

mod store;

pub use store::{InMemoryMachineStore, MachineFilter, MachineStore};
