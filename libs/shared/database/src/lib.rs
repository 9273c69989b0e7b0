pub mod error;
pub mod query;
pub mod supabase;

pub use error::DbError;
pub use query::PostgrestQuery;
pub use supabase::SupabaseClient;
