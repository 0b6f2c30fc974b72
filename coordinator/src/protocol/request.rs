use super::{from_cbor, to_cbor, FederatedValue};
use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// Kind of work a request asks of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Execute one instruction against the worker's local data
    ExecInst,
    /// Return the value stored under the id in the payload
    GetVar,
    /// Store `data[0]` under the request id
    PutVar,
    /// Drop the variable whose id is in the payload
    RemoveVar,
    /// Drop every variable owned by the request's session
    Clear,
}

/// Envelope sent from the coordinator to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedRequest {
    /// Identifier drawn from the coordinator's id sequence
    pub id: i64,
    pub request_type: RequestType,
    /// Caller session, used by the worker to scope its state
    pub tid: u64,
    /// Instruction text for `ExecInst`, variable id for `GetVar`/`RemoveVar`
    pub payload: String,
    /// Values shipped with the request (`PutVar`)
    #[serde(default)]
    pub data: Vec<FederatedValue>,
}

impl FederatedRequest {
    pub fn new(request_type: RequestType, id: i64, payload: impl Into<String>) -> Self {
        Self {
            id,
            request_type,
            tid: 0,
            payload: payload.into(),
            data: Vec::new(),
        }
    }

    /// Request executing one instruction
    pub fn exec_inst(id: i64, instruction: impl Into<String>) -> Self {
        Self::new(RequestType::ExecInst, id, instruction)
    }

    /// Request storing `value` under `id`
    pub fn put_var(id: i64, value: FederatedValue) -> Self {
        let mut request = Self::new(RequestType::PutVar, id, String::new());
        request.data.push(value);
        request
    }

    /// Request reading the variable `var_id`
    pub fn get_var(id: i64, var_id: i64) -> Self {
        Self::new(RequestType::GetVar, id, var_id.to_string())
    }

    /// Request dropping the variable `var_id`
    pub fn remove_var(id: i64, var_id: i64) -> Self {
        Self::new(RequestType::RemoveVar, id, var_id.to_string())
    }

    /// Request dropping the session's variables
    pub fn clear(id: i64) -> Self {
        Self::new(RequestType::Clear, id, String::new())
    }

    /// Attach the caller's session id
    pub fn with_tid(mut self, tid: u64) -> Self {
        self.tid = tid;
        self
    }

    /// Serialize to CBOR bytes
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    /// Deserialize from CBOR bytes
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}
