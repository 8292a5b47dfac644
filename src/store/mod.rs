//! Dashboard document store.
//!
//! | Module       | Contents                                              |
//! |--------------|-------------------------------------------------------|
//! | `db`         | `DashboardDb` (SQLite) and its async `DbHandle`       |
//! | `query`      | `SprintFilter` and `Projection` query parameters      |
//! | `repository` | Traits the engine and the collectors are generic over |

pub mod db;
pub mod query;
pub mod repository;

pub use db::{DashboardDb, DbHandle};
pub use query::{Projection, SprintFilter};
pub use repository::{
    CollectorRepository, CommitRepository, ComponentRepository, FeatureRepository,
    TestResultRepository,
};
