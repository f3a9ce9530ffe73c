pub mod driver;
pub mod snapshot;
pub mod trip;
