pub mod ask;
pub mod dataset;
pub mod health;
pub mod upload;
