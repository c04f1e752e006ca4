pub mod classes;
pub mod cohort;
pub mod compile;
pub mod core;
pub mod exchange;
pub mod scores;
pub mod students;
pub mod subjects;

mod shared;
