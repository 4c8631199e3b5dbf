pub mod classifier;
pub mod continuity;
pub mod dispatcher;
pub mod jobs;
pub mod refresher;
pub mod supervisor;
pub mod validator;
pub mod workers;

pub use classifier::{classify, classify_all, Classification};
pub use continuity::{BlockIngestor, ChainContinuity};
pub use dispatcher::{
    BatchDispatcher, Delivery, DispatchReport, RefreshPlan, RefreshTask, TaskQueue, TaskSource,
};
pub use refresher::{AccountRefresh, EntityRefresher, HistoryMode};
pub use supervisor::{Supervisor, SupervisorReport, SupervisorState};
pub use validator::{ValidationReport, Validator};
pub use workers::{UnknownWorker, WorkerContext, WorkerName};
