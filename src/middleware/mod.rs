pub mod audit;
pub mod request_meta;
