pub mod health_handlers;
pub mod object_handlers;
pub mod params;
pub mod resources;
pub mod signed_handlers;
pub mod upload_handlers;
