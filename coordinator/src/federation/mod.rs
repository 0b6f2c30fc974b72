//! Federation metadata: ranges, maps and the handles behind them
//!
//! A [`FederationMap`] routes disjoint [`FederatedRange`]s of a logical
//! matrix to the [`FederatedData`] handles that hold them.

mod data;
mod id;
mod map;
pub mod partition;
mod range;

pub use data::{FederatedData, FederatedLocalData, FederatedWorkerData};
pub use id::IdSequence;
pub use map::{federate, federate_local_data, FType, FederationMap};
pub use range::FederatedRange;
