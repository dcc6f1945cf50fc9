//! Worker process supervision and its loopback control channel.
//!
//! ```text
//! ┌──────────────────────┐   spawn(args)    ┌─────────────────────┐
//! │  WorkerSupervisor    │ ───────────────▶ │  worker process     │
//! │  secret + port       │                  │  127.0.0.1:<port>   │
//! │  HealthGate          │ ◀── /healthcheck │                     │
//! │  RpcClient ──────────┼──── /action ───▶ │                     │
//! └──────────────────────┘   x-worker-rpc-  └─────────────────────┘
//!                            password             │ stderr
//!                                                 ▼
//!                                             LogBuffer
//! ```

pub mod client;
pub mod health;
pub mod log_buffer;
pub mod notice;
pub mod protocol;
pub mod supervisor;

pub use client::RpcClient;
pub use health::{HealthGate, HealthProbe};
pub use log_buffer::LogBuffer;
pub use notice::{Availability, LogNotifier, Notifier, RecordingNotifier, UserNotice};
pub use protocol::{JobCommand, JobPayload, JobUrl, SeedStatus, TransferStatus};
pub use supervisor::{LaunchKind, SpawnOutcome, SupervisorState, WorkerHandle, WorkerSupervisor};
