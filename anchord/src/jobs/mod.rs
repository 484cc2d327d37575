//! Jobs: durable records of work run on behalf of an account.

pub mod manager;
pub mod model;

pub use manager::{
    BoxedWork, CANCELLED_LOG_TASK, JobDone, JobManager, MANAGER_LOG_PREFIX, Manager, WorkContext,
    WorkError, WorkResult,
};
pub use model::{DID_LENGTH, Did, Job, JobId, JobLog, JobValue, Status, StatusResponse};
