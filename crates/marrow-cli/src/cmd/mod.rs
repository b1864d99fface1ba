pub mod bridge;
pub mod comment;
pub mod create;
pub mod init;
pub mod label;
pub mod list;
pub mod merge;
pub mod show;
pub mod status;
pub mod title;
pub mod user;
