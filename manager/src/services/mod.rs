// File: manager/src/services/mod.rs

pub mod backup_service;
pub mod notification_service;
pub mod remote_storage;

pub use backup_service::{BackupReport, BackupService, BackupStep};
pub use notification_service::{DispatchSummary, NotificationDispatcher, Operation, RunNotice};
pub use remote_storage::RemoteStorage;
