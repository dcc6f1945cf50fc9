pub mod clienv;
pub mod config;
pub mod error;
pub mod locator;
pub mod port_allocator;
pub mod reference_worker;
pub mod release;
pub mod secret_store;
pub mod worker;

pub use config::SupervisorConfig;
pub use error::{Result, RpcError};
pub use locator::{BinaryLocator, BinaryResolution, Platform};
pub use secret_store::{JsonFileStore, KeyValueStore, MemoryStore, SecretStore};
pub use worker::{RpcClient, SpawnOutcome, SupervisorState, WorkerSupervisor};
