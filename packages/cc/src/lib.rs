pub mod classes;
pub mod context;
pub mod prelude;
