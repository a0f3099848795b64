pub mod collection;
pub mod config_cmd;
pub mod conversation;
pub mod ingest;
pub mod init;
pub mod runtime;
pub mod search;
