pub mod api;
pub mod ballot;
pub mod db;
pub mod mongodb;
pub mod session;
pub mod settings;
pub mod voter;
