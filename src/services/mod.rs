pub mod adapter;
pub mod async_path;
pub mod backend;
pub mod catalog;
pub mod dispatch;
pub mod executor;
pub mod fallback;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod poller;
pub mod queue;
pub mod records;
pub mod storage;
pub mod sync_path;
pub mod workflow;
