//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                         |
//! |-------------|------------------------------------------|
//! | `serve`     | `Serve`                                  |
//! | `collect`   | `Collect`                                |
//! | `db`        | `InitDb`                                 |
//! | `config`    | `Config`                                 |
//! | `component` | `Component`                              |

pub mod collect;
pub mod component;
pub mod config;
pub mod db;
pub mod serve;

pub use collect::cmd_collect;
pub use component::cmd_component;
pub use config::cmd_config;
pub use db::cmd_init_db;
pub use serve::cmd_serve;
