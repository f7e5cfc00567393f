pub mod notion;
pub mod repo;
pub mod sqlite;

pub use repo::DigestRepository;
pub use sqlite::SqliteRepo;
