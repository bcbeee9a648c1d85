pub mod entry_handlers;
pub mod folder_handlers;
pub mod health_handlers;
pub mod search_handlers;
pub mod sync_handlers;
