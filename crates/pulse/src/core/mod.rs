pub mod factory;
pub mod feed;
pub mod preview;
pub mod projection;

pub use factory::FeedFactory;
pub use feed::{Created, FeedEngine, FeedSnapshot, FeedSpec, FeedStatus};
pub use preview::preview;
pub use projection::{FieldProjection, Projection, project_record};
