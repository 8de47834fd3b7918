pub mod models;
pub mod sections;
pub mod timeline;
