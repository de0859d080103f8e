pub mod cache;
pub mod client;
pub mod compare;
pub mod config;
pub mod dataset;
pub mod index;
pub mod normalize;
pub mod pfs;
pub mod resolve;
pub mod resolver;
pub mod server;
pub mod types;
pub mod zipcode;

pub use client::{FeeSchedule, FeeScheduleRequest, PfsClient};
pub use config::Config;
pub use dataset::{DatasetSource, FileSource, HttpSource, LoadError, StaticSource};
pub use index::CompiledIndex;
pub use resolver::{LocalityResolver, ResolveError};
pub use types::{
    Dataset, FailureReason, LocalityMatch, LocalityRecord, MatchVia, ResolveFailure, ZipCounty,
};
pub use zipcode::describe_zip;
