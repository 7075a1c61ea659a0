pub mod mentions;
pub mod service;

pub use mentions::extract_mentions;
pub use service::ContentService;
