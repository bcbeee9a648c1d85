pub mod entry_service;
pub mod folder_service;
pub mod geocoder;
pub mod image_store;
pub mod ordering;
pub mod search_service;
pub mod sync_service;
pub mod tree_render;
