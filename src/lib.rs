pub mod batch;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod ocr;
pub mod pipeline;
pub mod policy;
pub mod region;
pub mod report;
pub mod resolve;
pub mod roi;
pub mod util;
