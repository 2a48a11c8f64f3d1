// External collaborators: Supabase persistence, published keys, in-memory fallback

pub mod jwks;
pub mod memory_store;
pub mod supabase;
pub mod supabase_store;
