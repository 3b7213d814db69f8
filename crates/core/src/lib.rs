pub mod builder;
pub mod decode;
pub mod error;
pub mod filter;
pub mod links;
pub mod merge;
pub mod model;
pub mod output;
pub mod params;
pub mod proxy;
pub mod rules;
pub mod storage;
pub mod subscription;
pub mod template;

pub use builder::{build_document, synthesize, ConfigTarget, Document, Target};
pub use error::BuildError;
pub use filter::ExclusionFilter;
pub use links::build_link_bundle;
pub use model::ClashConfig;
pub use params::BuildParams;
pub use proxy::{ProxyKind, ProxyRecord};
pub use subscription::{collect_records, Fetcher, HttpFetcher};
pub use template::Template;
