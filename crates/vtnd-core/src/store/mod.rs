// ── In-memory storage ──

mod memory;
mod table;
mod table_manager;

pub use memory::MemoryStore;
pub use table_manager::TableManager;
