// SPDX-License-Identifier: MIT

pub mod client;
pub mod config;
pub mod disk;
pub mod error;
pub mod lru;
pub mod model;
pub mod repository;
pub mod retry;
pub mod search;
pub mod sync;

pub use client::RemoteCatalogClient;
pub use config::Config;
pub use disk::DiskContentCache;
pub use error::{CatalogError, CatalogResult};
pub use repository::CatalogRepository;
pub use sync::ProgressiveSyncCoordinator;
