pub mod report;
pub mod task;
pub mod testdata;
