pub mod hasher;
pub mod locks;
pub mod multipart;
pub mod path_guard;
pub mod preconditions;
pub mod sessions;
pub mod signing;
pub mod upload;
pub mod version_store;
