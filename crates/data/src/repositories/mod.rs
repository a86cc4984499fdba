//! Database repositories.

pub mod wheel_repo;

pub use wheel_repo::{WheelRepository, WHEEL_SCHEMA};

use sqlx::PgPool;

/// Creates all repositories from a single database pool.
pub struct Repositories {
    pub wheel: WheelRepository,
}

impl Repositories {
    /// Creates a new set of repositories from a database pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            wheel: WheelRepository::new(pool),
        }
    }
}
