pub mod export_schema;
pub mod init;
pub mod serve;
