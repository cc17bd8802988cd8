pub mod codes;
pub mod core;
pub mod missions;
pub mod roster;
pub mod teacher;
