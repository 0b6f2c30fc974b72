//! Federated execution and aggregation for partitioned matrices
//!
//! A logical matrix is split across independent workers. The coordinator
//! decides per instruction whether to run it federated, rewrites it for the
//! workers, broadcasts it, and folds the partial results into one value.

pub mod aggregation;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod federation;
pub mod instruction;
pub mod matrix;
pub mod observability;
pub mod protocol;
pub mod selector;
pub mod worker;

pub use aggregation::{AggregateFunction, AggregateUnaryOperator, Direction};
pub use config::Config;
pub use context::{CacheableData, Data, ExecutionContext};
pub use errors::{FederatedError, Result};
pub use federation::{
    federate, federate_local_data, FType, FederatedData, FederatedRange, FederationMap,
    IdSequence,
};
pub use instruction::{Instruction, Operand};
pub use matrix::MatrixBlock;
pub use observability::{init_from_config, init_production_logging, init_simple_logging};
pub use protocol::{FederatedRequest, FederatedResponse, FederatedValue, PendingResponse};
pub use selector::{select_instruction, FedInstruction, FedKind, Selection};
pub use worker::{FederatedWorkerHandler, WorkerHandle};
