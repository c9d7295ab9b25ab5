pub mod backend_traits;
pub mod records;
pub mod sqlite;
pub mod supabase;
