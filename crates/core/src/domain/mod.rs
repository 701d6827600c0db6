pub mod actor;
pub mod change;
