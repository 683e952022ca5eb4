pub mod api;
pub mod builders;
pub mod controllers;
pub mod features;
pub mod store;
pub mod util;
